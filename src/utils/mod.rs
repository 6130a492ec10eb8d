//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Application data directory management (XDG-compliant)
//! - [`encoding`] - Varint and little-endian codecs for the on-disk formats
//! - [`filter`] - Which files in a workspace are documents
//! - [`progress`] - Optional progress bars
//! - [`segmenter`] - Text segmentation into searchable terms
//!
//! ## Key Functions
//!
//! ```
//! use casefind::utils::segment;
//!
//! let terms: Vec<String> = segment("Login 测试").into_iter().map(|t| t.term).collect();
//! assert_eq!(terms, ["login", "测", "测试", "试"]);
//! ```

pub mod app_data;
pub mod encoding;
pub mod filter;
pub mod progress;
pub mod segmenter;

pub use app_data::*;
pub use filter::{DocumentFilter, FoundFile};
pub use segmenter::{is_han, segment, Token};
