//! Ranking of matched documents.
//!
//! The score is the summed occurrence count of the query terms. Ties go to the
//! most recently modified document, then to the lexically smaller path, so the
//! order is total and stable across runs.

use crate::index::snapshot::IndexedDoc;
use std::cmp::Ordering;
use std::sync::Arc;

/// A matched document and its score
#[derive(Debug, Clone)]
pub struct ScoredDoc {
    pub doc: Arc<IndexedDoc>,
    pub score: u32,
}

/// Summed term frequency of `terms` in `doc`
pub fn score(doc: &IndexedDoc, terms: &[String]) -> u32 {
    terms
        .iter()
        .fold(0u32, |acc, term| acc.saturating_add(doc.term_frequency(term)))
}

/// Result order: score desc, mtime desc, path asc
pub fn rank_order(a: &ScoredDoc, b: &ScoredDoc) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.doc.document.mtime.cmp(&a.doc.document.mtime))
        .then_with(|| a.doc.document.path.cmp(&b.doc.document.path))
}

/// Keep the best `max` documents, in result order
pub fn top_k(mut scored: Vec<ScoredDoc>, max: usize) -> Vec<ScoredDoc> {
    if max == 0 {
        return Vec::new();
    }
    if scored.len() > max {
        scored.select_nth_unstable_by(max - 1, rank_order);
        scored.truncate(max);
    }
    scored.sort_by(rank_order);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::snapshot::prepare;
    use crate::index::types::Document;
    use std::path::PathBuf;

    fn scored(path: &str, content: &str, mtime: u64, terms: &[String]) -> ScoredDoc {
        let prepared = prepare(path, content, mtime);
        let doc = Arc::new(IndexedDoc {
            document: Document {
                doc_id: 0,
                path: prepared.path,
                content_hash: prepared.content_hash,
                mtime,
                size: prepared.size,
                indexed_at: 0,
            },
            content: Arc::from(content),
            terms: prepared.terms,
        });
        let score = score(&doc, terms);
        ScoredDoc { doc, score }
    }

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_score_sums_frequencies() {
        let query = terms(&["login", "fail"]);
        let doc = scored("a.md", "login, login again, fail", 0, &query);
        assert_eq!(doc.score, 3);
    }

    #[test]
    fn test_ties_break_by_mtime_then_path() {
        let query = terms(&["case"]);
        let ranked = top_k(
            vec![
                scored("b.md", "case", 10, &query),
                scored("old.md", "case", 5, &query),
                scored("a.md", "case", 10, &query),
                scored("best.md", "case case", 1, &query),
            ],
            10,
        );

        let paths: Vec<PathBuf> = ranked.iter().map(|s| s.doc.document.path.clone()).collect();
        assert_eq!(
            paths,
            ["best.md", "a.md", "b.md", "old.md"].map(PathBuf::from)
        );
    }

    #[test]
    fn test_top_k_truncates() {
        let query = terms(&["x"]);
        let docs: Vec<ScoredDoc> = (0..20)
            .map(|i| scored(&format!("{i:02}.md"), &"x ".repeat(i + 1), 0, &query))
            .collect();

        let ranked = top_k(docs, 3);
        let scores: Vec<u32> = ranked.iter().map(|s| s.score).collect();
        assert_eq!(scores, [20, 19, 18]);
        assert!(top_k(ranked, 0).is_empty());
    }
}
