use crate::utils::segmenter::segment;

/// Parsed query: the distinct terms a document must all contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Original query text
    pub raw: String,
    /// Normalized terms in order of first appearance
    pub terms: Vec<String>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Parse a query with the same segmentation used for indexing.
///
/// There is no operator syntax: every term is required.
pub fn parse_query(input: &str) -> Query {
    let mut terms: Vec<String> = Vec::new();
    for token in segment(input) {
        if !terms.contains(&token.term) {
            terms.push(token.term);
        }
    }

    Query {
        raw: input.to_string(),
        terms,
    }
}
