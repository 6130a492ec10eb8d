//! Query execution against index snapshots.
//!
//! A search segments the query, intersects the document sets of all terms
//! (smallest first, stopping as soon as a term is missing), scores the
//! survivors, keeps the top results and builds highlighted snippets for them.
//! Everything runs against one snapshot, so a search never observes a
//! half-applied commit, and it never fails: bad input yields no results.

use crate::config::SearchSettings;
use crate::index::snapshot::{IndexSnapshot, IndexedDoc};
use crate::index::store::IndexStore;
use crate::index::types::Generation;
use crate::query::parser::{parse_query, Query};
use crate::query::scorer::{score, top_k, ScoredDoc};
use crate::query::snippet::{build_snippets, Snippet};
use crate::utils::segmenter::occurrence_len;
use lru::LruCache;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One ranked result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Summed occurrence count of the query terms
    pub score: u32,
    /// Modification time (ns since the epoch) of the indexed version
    pub mtime: u64,
    pub snippets: Vec<Snippet>,
}

/// Documents containing every query term; `None` as soon as one term is absent
fn matching_docs(snapshot: &IndexSnapshot, query: &Query) -> Option<RoaringBitmap> {
    let mut bitmaps = Vec::with_capacity(query.terms.len());
    for term in &query.terms {
        bitmaps.push(snapshot.docs_with(term)?);
    }
    bitmaps.sort_by_key(|bitmap| bitmap.len());

    let (first, rest) = bitmaps.split_first()?;
    let mut acc = (*first).clone();
    for bitmap in rest {
        acc &= *bitmap;
        if acc.is_empty() {
            return None;
        }
    }
    Some(acc)
}

fn term_ranges(doc: &IndexedDoc, term: &str) -> impl Iterator<Item = Range<usize>> {
    let content: &str = &doc.content;
    doc.occurrences(term).iter().filter_map(move |&offset| {
        let start = offset as usize;
        occurrence_len(content, start, term).map(|len| start..start + len)
    })
}

fn snippets_for(doc: &IndexedDoc, query: &Query, radius: usize) -> Vec<Snippet> {
    let anchors: Vec<Range<usize>> = query
        .terms
        .iter()
        .filter_map(|term| term_ranges(doc, term).next())
        .collect();
    let occurrences: Vec<Range<usize>> = query
        .terms
        .iter()
        .flat_map(|term| term_ranges(doc, term))
        .collect();

    build_snippets(&doc.content, &anchors, &occurrences, radius)
}

/// Run a parsed query against a snapshot
pub fn execute(
    snapshot: &IndexSnapshot,
    query: &Query,
    max_results: usize,
    snippet_radius: usize,
) -> Vec<SearchHit> {
    if query.is_empty() || max_results == 0 {
        return Vec::new();
    }

    let Some(candidates) = matching_docs(snapshot, query) else {
        return Vec::new();
    };

    let scored: Vec<ScoredDoc> = candidates
        .iter()
        .filter_map(|doc_id| snapshot.get(doc_id))
        .map(|doc| ScoredDoc {
            score: score(doc, &query.terms),
            doc: Arc::clone(doc),
        })
        .collect();

    top_k(scored, max_results)
        .into_iter()
        .map(|scored| SearchHit {
            path: scored.doc.document.path.clone(),
            score: scored.score,
            mtime: scored.doc.document.mtime,
            snippets: snippets_for(&scored.doc, query, snippet_radius),
        })
        .collect()
}

struct QueryCache {
    generation: Generation,
    entries: LruCache<(String, usize), Arc<Vec<SearchHit>>>,
}

/// Searches a store, caching results until the next commit
pub struct QueryEngine {
    store: Arc<IndexStore>,
    snippet_radius: usize,
    cache: Option<Mutex<QueryCache>>,
}

impl QueryEngine {
    pub fn new(store: Arc<IndexStore>, settings: &SearchSettings) -> Self {
        let cache = NonZeroUsize::new(settings.cache_size).map(|capacity| {
            Mutex::new(QueryCache {
                generation: 0,
                entries: LruCache::new(capacity),
            })
        });

        Self {
            store,
            snippet_radius: settings.snippet_radius,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Search the snapshot current at call time
    pub fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit> {
        self.search_shared(query, max_results).as_ref().clone()
    }

    fn search_shared(&self, query: &str, max_results: usize) -> Arc<Vec<SearchHit>> {
        let snapshot = self.store.snapshot();
        let key = (query.to_string(), max_results);

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if cache.generation != snapshot.generation() {
                cache.entries.clear();
                cache.generation = snapshot.generation();
            } else if let Some(hits) = cache.entries.get(&key) {
                return Arc::clone(hits);
            }
        }

        let parsed = parse_query(query);
        let hits = Arc::new(execute(&snapshot, &parsed, max_results, self.snippet_radius));
        debug!(
            query,
            terms = parsed.terms.len(),
            hits = hits.len(),
            generation = snapshot.generation(),
            "search"
        );

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // A commit may have landed meanwhile; only cache results for the current generation
            if cache.generation == snapshot.generation() {
                cache.entries.put(key, Arc::clone(&hits));
            }
        }

        hits
    }

    /// Run a search on the rayon pool. Dropping the receiver abandons the result.
    pub fn search_in_background(
        self: &Arc<Self>,
        query: String,
        max_results: usize,
    ) -> Receiver<Vec<SearchHit>> {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(self);
        rayon::spawn(move || {
            let _ = tx.send(engine.search(&query, max_results));
        });
        rx
    }
}
