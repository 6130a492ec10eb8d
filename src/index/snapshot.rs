//! Immutable views of the index.
//!
//! The store publishes a new [`IndexSnapshot`] after every commit. Cloning a
//! snapshot copies its hash tables but none of their contents: documents, term
//! keys and term bitmaps all sit behind `Arc`. A mutation copies only the
//! bitmaps of the terms it touches, so readers holding an older snapshot are
//! never affected by later writes.

use crate::index::types::{ContentHash, DocId, Document, Generation, Posting};
use crate::utils::segmenter::segment;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Term -> strictly increasing, non-overlapping byte offsets
pub type TermOffsets = FxHashMap<String, Vec<u32>>;

/// A document together with the text and postings it was indexed with
#[derive(Debug)]
pub struct IndexedDoc {
    pub document: Document,
    pub content: Arc<str>,
    pub terms: TermOffsets,
}

impl IndexedDoc {
    pub fn occurrences(&self, term: &str) -> &[u32] {
        self.terms.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn term_frequency(&self, term: &str) -> u32 {
        self.occurrences(term).len() as u32
    }
}

/// A document hashed and segmented ahead of its commit.
///
/// Preparation is pure and runs outside the writer lock, so many files can be
/// prepared in parallel while commits stay serialized.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub path: PathBuf,
    pub content: String,
    pub content_hash: ContentHash,
    pub mtime: u64,
    pub size: u64,
    pub terms: TermOffsets,
}

/// Prepare text content for indexing
pub fn prepare(path: impl Into<PathBuf>, content: &str, mtime: u64) -> PreparedDocument {
    PreparedDocument {
        path: path.into(),
        content_hash: Sha256::digest(content.as_bytes()).into(),
        size: content.len() as u64,
        terms: build_postings(content),
        content: content.to_string(),
        mtime,
    }
}

/// Prepare raw file bytes; invalid UTF-8 is replaced, the hash covers the raw bytes
pub fn prepare_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>, mtime: u64) -> PreparedDocument {
    let content_hash: ContentHash = Sha256::digest(&bytes).into();
    let size = bytes.len() as u64;
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    PreparedDocument {
        path: path.into(),
        terms: build_postings(&content),
        content,
        content_hash,
        mtime,
        size,
    }
}

/// Segment content into per-term offset lists.
///
/// Occurrences of a term that overlap its previous occurrence (a repeated
/// character pair such as `测测测`) are dropped so offsets never overlap.
pub fn build_postings(content: &str) -> TermOffsets {
    let mut terms: TermOffsets = FxHashMap::default();

    for token in segment(content) {
        let Ok(offset) = u32::try_from(token.offset) else {
            break;
        };
        let offsets = terms.entry(token.term).or_default();
        let overlaps = offsets
            .last()
            .is_some_and(|&prev| prev as usize + token.len > token.offset);
        if !overlaps {
            offsets.push(offset);
        }
    }

    terms
}

#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    generation: Generation,
    docs: FxHashMap<DocId, Arc<IndexedDoc>>,
    paths: BTreeMap<PathBuf, DocId>,
    dictionary: FxHashMap<Arc<str>, Arc<RoaringBitmap>>,
    next_doc_id: DocId,
}

impl IndexSnapshot {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Number of distinct terms with at least one posting
    pub fn term_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn next_doc_id(&self) -> DocId {
        self.next_doc_id
    }

    pub fn get(&self, doc_id: DocId) -> Option<&Arc<IndexedDoc>> {
        self.docs.get(&doc_id)
    }

    pub fn by_path(&self, path: &Path) -> Option<&Arc<IndexedDoc>> {
        self.paths.get(path).and_then(|id| self.docs.get(id))
    }

    pub fn document(&self, path: &Path) -> Option<&Document> {
        self.by_path(path).map(|doc| &doc.document)
    }

    /// Documents containing `term`
    pub fn docs_with(&self, term: &str) -> Option<&RoaringBitmap> {
        self.dictionary.get(term).map(|bitmap| bitmap.as_ref())
    }

    /// Postings for `term`, ordered by doc id
    pub fn postings(&self, term: &str) -> Vec<Posting> {
        let Some(bitmap) = self.docs_with(term) else {
            return Vec::new();
        };

        bitmap
            .iter()
            .filter_map(|doc_id| {
                let doc = self.docs.get(&doc_id)?;
                Some(Posting {
                    doc_id,
                    path: doc.document.path.clone(),
                    offsets: doc.occurrences(term).to_vec(),
                })
            })
            .collect()
    }

    /// All documents ordered by path
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.paths
            .values()
            .filter_map(|id| self.docs.get(id))
            .map(|doc| &doc.document)
    }

    /// Iterate the dictionary in arbitrary order
    pub fn terms(&self) -> impl Iterator<Item = (&str, &RoaringBitmap)> {
        self.dictionary
            .iter()
            .map(|(term, bitmap)| (term.as_ref(), bitmap.as_ref()))
    }

    /// Paths of documents at or below `prefix` (an empty prefix means all)
    pub fn paths_under(&self, prefix: &Path) -> Vec<PathBuf> {
        self.paths
            .range(prefix.to_path_buf()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn has_documents_under(&self, prefix: &Path) -> bool {
        self.paths
            .range(prefix.to_path_buf()..)
            .next()
            .is_some_and(|(path, _)| path.starts_with(prefix))
    }

    pub(crate) fn set_generation(&mut self, generation: Generation) {
        self.generation = generation;
    }

    pub(crate) fn bump_generation(&mut self) -> Generation {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn set_next_doc_id(&mut self, next: DocId) {
        self.next_doc_id = self.next_doc_id.max(next);
    }

    /// Doc id for `path`: the existing one, or a fresh one
    pub(crate) fn assign_doc_id(&mut self, path: &Path) -> DocId {
        if let Some(&id) = self.paths.get(path) {
            return id;
        }
        let id = self.next_doc_id;
        self.next_doc_id += 1;
        id
    }

    /// Insert or replace a document and all of its postings
    pub(crate) fn insert(&mut self, doc: IndexedDoc) {
        let doc_id = doc.document.doc_id;
        if let Some(old_id) = self.paths.get(&doc.document.path).copied() {
            self.unlink(old_id);
        }
        if self.docs.contains_key(&doc_id) {
            self.unlink(doc_id);
        }

        for term in doc.terms.keys() {
            match self.dictionary.get_mut(term.as_str()) {
                Some(bitmap) => {
                    Arc::make_mut(bitmap).insert(doc_id);
                }
                None => {
                    let mut bitmap = RoaringBitmap::new();
                    bitmap.insert(doc_id);
                    self.dictionary.insert(Arc::from(term.as_str()), Arc::new(bitmap));
                }
            }
        }

        self.next_doc_id = self.next_doc_id.max(doc_id + 1);
        self.paths.insert(doc.document.path.clone(), doc_id);
        self.docs.insert(doc_id, Arc::new(doc));
    }

    /// Record a new modification time and size for an indexed document whose
    /// content is unchanged. Postings and the generation are left alone.
    pub(crate) fn refresh_metadata(&mut self, path: &Path, mtime: u64, size: u64) -> bool {
        let Some(doc) = self.paths.get(path).and_then(|id| self.docs.get_mut(id)) else {
            return false;
        };
        let mut document = doc.document.clone();
        document.mtime = mtime;
        document.size = size;
        let refreshed = IndexedDoc {
            document,
            content: Arc::clone(&doc.content),
            terms: doc.terms.clone(),
        };
        *doc = Arc::new(refreshed);
        true
    }

    /// Remove the document at `path` and all of its postings
    pub(crate) fn remove(&mut self, path: &Path) -> Option<Arc<IndexedDoc>> {
        let doc_id = *self.paths.get(path)?;
        self.unlink(doc_id)
    }

    fn unlink(&mut self, doc_id: DocId) -> Option<Arc<IndexedDoc>> {
        let doc = self.docs.remove(&doc_id)?;
        self.paths.remove(&doc.document.path);

        for term in doc.terms.keys() {
            let emptied = match self.dictionary.get_mut(term.as_str()) {
                Some(bitmap) => {
                    let bitmap = Arc::make_mut(bitmap);
                    bitmap.remove(doc_id);
                    bitmap.is_empty()
                }
                None => false,
            };
            if emptied {
                self.dictionary.remove(term.as_str());
            }
        }

        Some(doc)
    }
}
