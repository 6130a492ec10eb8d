//! # casefind - incremental search for test-case documents
//!
//! casefind keeps a persistent full-text index of a tree of markdown test
//! cases and keeps it current while the files are edited. Latin text is
//! indexed by lowercased words; Chinese text by overlapping 1- and 2-grams,
//! so any substring of a Han phrase can be searched without a dictionary.
//!
//! ## Architecture
//!
//! - [`utils`] - Segmentation, document filtering, on-disk codecs, app data paths
//! - [`index`] - The durable store (journal + checkpoint), snapshots and reconciliation
//! - [`query`] - Query parsing, AND matching, ranking and snippets
//! - [`server`] - Watcher, change coalescer, single-writer worker and [`IndexService`](server::IndexService)
//! - [`output`] - Terminal and JSON formatting of results
//!
//! ## Quick Start
//!
//! ```no_run
//! use casefind::config::Config;
//! use casefind::server::IndexService;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let service = IndexService::start(Path::new("./cases"), &Config::load()).unwrap();
//! service.wait_idle(Duration::from_secs(30));
//!
//! for hit in service.search("登录 失败", Some(10)) {
//!     println!("{} ({})", hit.path.display(), hit.score);
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod output;
pub mod query;
pub mod server;
pub mod utils;

pub use error::{Result, StoreError};
