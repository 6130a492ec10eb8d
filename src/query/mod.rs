pub mod engine;
pub mod parser;
pub mod scorer;
pub mod snippet;

pub use engine::{execute, QueryEngine, SearchHit};
pub use parser::{parse_query, Query};
pub use snippet::Snippet;
