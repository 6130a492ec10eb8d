use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a document in the index. Stable for a path across
/// reindexes, never reused after removal within one index lifetime.
pub type DocId = u32;

/// Monotonic counter bumped by every committed mutation
pub type Generation = u64;

/// SHA-256 of a document's raw bytes
pub type ContentHash = [u8; 32];

/// Current on-disk format version
pub const INDEX_VERSION: u32 = 1;

/// Document record: one per indexed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: DocId,
    /// Path relative to the workspace root
    pub path: PathBuf,
    pub content_hash: ContentHash,
    /// Modification time in nanoseconds since the epoch, as seen when indexed
    pub mtime: u64,
    /// Size in bytes, as seen when indexed
    pub size: u64,
    /// Unix timestamp (seconds) of the commit that produced this record
    pub indexed_at: u64,
}

impl Document {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

/// All occurrences of one term in one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    pub path: PathBuf,
    /// Strictly increasing, non-overlapping byte offsets into the document
    pub offsets: Vec<u32>,
}

/// What a committed upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Content hash matched the indexed document; nothing changed
    Unchanged,
    Inserted,
    Updated,
}

/// A settled change for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Created, written or moved into the workspace
    Modified,
    /// Deleted or moved out of the workspace
    Removed,
}

/// A settled intent to bring one path in line with the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path relative to the workspace root
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Index metadata stored in meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub root_path: PathBuf,
    /// Generation of the last checkpoint
    pub generation: Generation,
    pub doc_count: u32,
    pub term_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
    /// Set by the first completed full reconcile
    #[serde(default)]
    pub last_reconciled_at: Option<u64>,
}

impl IndexMeta {
    pub fn new(root_path: PathBuf) -> Self {
        let now = unix_now();
        Self {
            version: INDEX_VERSION,
            root_path,
            generation: 0,
            doc_count: 0,
            term_count: 0,
            created_at: now,
            updated_at: now,
            last_reconciled_at: None,
        }
    }
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
