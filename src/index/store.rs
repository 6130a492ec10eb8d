//! Persistent, transactional inverted index.
//!
//! Readers take an `Arc` of the current [`IndexSnapshot`] and keep it for as
//! long as they like. Writers are serialized by a mutex: a commit copies the
//! current snapshot, applies its mutations, appends them to the journal and
//! only then publishes the new snapshot. A failed journal append leaves the
//! published snapshot untouched, so a document is always either fully old or
//! fully new.

use crate::error::{Result, StoreError};
use crate::index::checkpoint;
use crate::index::journal::{Journal, JournalRecord};
use crate::index::snapshot::{build_postings, prepare, IndexSnapshot, IndexedDoc, PreparedDocument};
use crate::index::types::{
    unix_now, Document, Generation, IndexMeta, Posting, UpsertOutcome, INDEX_VERSION,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

pub const META_FILE: &str = "meta.json";

/// Tunables for an [`IndexStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Journal records between automatic checkpoints (0 disables them)
    pub checkpoint_interval: usize,
    /// fsync the journal after every commit
    pub sync_writes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 256,
            sync_writes: false,
        }
    }
}

/// One mutation of a batch passed to [`IndexStore::apply`]
#[derive(Debug, Clone)]
pub enum Mutation {
    Upsert(PreparedDocument),
    Remove(PathBuf),
}

/// Result of one [`Mutation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Upserted(UpsertOutcome),
    Removed,
    /// Removal of a path that was not indexed
    Absent,
}

struct StoreWriter {
    journal: Journal,
    meta: IndexMeta,
    since_checkpoint: usize,
    /// Document metadata refreshed since the last checkpoint (not journaled)
    metadata_dirty: bool,
}

pub struct IndexStore {
    root: PathBuf,
    dir: PathBuf,
    options: StoreOptions,
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<StoreWriter>,
    needs_rebuild: AtomicBool,
}

impl IndexStore {
    /// Open the index for `root` stored in `dir`, creating it if needed.
    ///
    /// Corrupt on-disk state is discarded with a warning and the store opens
    /// empty with [`needs_rebuild`](Self::needs_rebuild) set. Only genuine I/O
    /// failures are returned as errors.
    pub fn open(root: &Path, dir: &Path, options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let (snapshot, journal, meta, recovered) = match load(root, dir, &options) {
            Ok((snapshot, journal, meta)) => (snapshot, journal, meta, false),
            Err(e) if e.is_corruption() => {
                warn!(index = %dir.display(), error = %e, "index is corrupt, discarding it for a rebuild");
                wipe(dir)?;
                let (journal, _) = Journal::open(dir, options.sync_writes)?;
                let meta = IndexMeta::new(root.to_path_buf());
                write_meta(dir, &meta)?;
                (IndexSnapshot::default(), journal, meta, true)
            }
            Err(e) => return Err(e),
        };

        info!(
            root = %root.display(),
            documents = snapshot.document_count(),
            terms = snapshot.term_count(),
            generation = snapshot.generation(),
            "index opened"
        );

        let since_checkpoint = journal.record_count();
        Ok(Self {
            root: root.to_path_buf(),
            dir: dir.to_path_buf(),
            options,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(StoreWriter {
                journal,
                meta,
                since_checkpoint,
                metadata_dirty: false,
            }),
            needs_rebuild: AtomicBool::new(recovered),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self) -> &Path {
        &self.dir
    }

    /// The snapshot current at call time
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn generation(&self) -> Generation {
        self.snapshot().generation()
    }

    pub fn document_count(&self) -> usize {
        self.snapshot().document_count()
    }

    pub fn term_count(&self) -> usize {
        self.snapshot().term_count()
    }

    pub fn document(&self, path: &Path) -> Option<Document> {
        self.snapshot().document(path).cloned()
    }

    /// Postings for a normalized term in the current snapshot
    pub fn lookup(&self, term: &str) -> Vec<Posting> {
        self.snapshot().postings(term)
    }

    /// Whether the store was opened over corrupt state and must be rebuilt
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    /// Whether no full reconcile has ever completed for this workspace
    pub fn is_first_open(&self) -> bool {
        self.lock_writer().meta.last_reconciled_at.is_none()
    }

    pub fn meta(&self) -> IndexMeta {
        self.lock_writer().meta.clone()
    }

    /// Index `content` for `path`. A no-op when the content hash is unchanged.
    pub fn upsert(&self, path: &Path, content: &str, mtime: u64) -> Result<UpsertOutcome> {
        self.commit(prepare(path, content, mtime))
    }

    /// Commit a document prepared with [`prepare`] or [`prepare_bytes`](crate::index::snapshot::prepare_bytes)
    pub fn commit(&self, prepared: PreparedDocument) -> Result<UpsertOutcome> {
        match self.apply(vec![Mutation::Upsert(prepared)])?.first() {
            Some(MutationOutcome::Upserted(outcome)) => Ok(*outcome),
            _ => Ok(UpsertOutcome::Unchanged),
        }
    }

    /// Remove `path`; returns whether it was indexed
    pub fn remove(&self, path: &Path) -> Result<bool> {
        let outcomes = self.apply(vec![Mutation::Remove(path.to_path_buf())])?;
        Ok(matches!(outcomes.first(), Some(MutationOutcome::Removed)))
    }

    /// Apply a batch of mutations and publish them as one snapshot.
    ///
    /// Every effective mutation bumps the generation once; unchanged upserts and
    /// removals of absent paths do not. Readers see either none or all of the batch.
    ///
    /// An unchanged upsert with a new mtime or size only refreshes the stored
    /// metadata, so the next reconcile can skip the file. That refresh is
    /// persisted by the next checkpoint rather than the journal.
    pub fn apply(&self, batch: Vec<Mutation>) -> Result<Vec<MutationOutcome>> {
        let mut writer = self.lock_writer();
        let mut next = IndexSnapshot::clone(&self.snapshot());
        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut refreshed = false;
        let now = unix_now();

        for mutation in batch {
            match mutation {
                Mutation::Upsert(prepared) => {
                    // (same content, stale metadata)
                    let existing = next.document(&prepared.path).map(|doc| {
                        (
                            doc.content_hash == prepared.content_hash,
                            doc.mtime != prepared.mtime || doc.size != prepared.size,
                        )
                    });
                    if let Some((true, stale)) = existing {
                        if stale {
                            refreshed |= next.refresh_metadata(&prepared.path, prepared.mtime, prepared.size);
                        }
                        outcomes.push(MutationOutcome::Upserted(UpsertOutcome::Unchanged));
                        continue;
                    }
                    let outcome = if existing.is_some() {
                        UpsertOutcome::Updated
                    } else {
                        UpsertOutcome::Inserted
                    };

                    let generation = next.bump_generation();
                    let document = Document {
                        doc_id: next.assign_doc_id(&prepared.path),
                        path: prepared.path,
                        content_hash: prepared.content_hash,
                        mtime: prepared.mtime,
                        size: prepared.size,
                        indexed_at: now,
                    };
                    let content: Arc<str> = Arc::from(prepared.content);
                    debug!(path = %document.path.display(), generation, ?outcome, "upsert");

                    records.push(JournalRecord::Upsert {
                        generation,
                        document: document.clone(),
                        content: Arc::clone(&content),
                    });
                    next.insert(IndexedDoc {
                        document,
                        content,
                        terms: prepared.terms,
                    });
                    outcomes.push(MutationOutcome::Upserted(outcome));
                }
                Mutation::Remove(path) => {
                    if next.remove(&path).is_none() {
                        outcomes.push(MutationOutcome::Absent);
                        continue;
                    }
                    let generation = next.bump_generation();
                    debug!(path = %path.display(), generation, "remove");
                    records.push(JournalRecord::Remove { generation, path });
                    outcomes.push(MutationOutcome::Removed);
                }
            }
        }

        if records.is_empty() {
            if refreshed {
                writer.metadata_dirty = true;
                self.publish(Arc::new(next));
            }
            return Ok(outcomes);
        }

        writer.journal.append(&records)?;
        writer.metadata_dirty |= refreshed;
        writer.since_checkpoint += records.len();
        let published = Arc::new(next);
        self.publish(Arc::clone(&published));

        if self.options.checkpoint_interval > 0
            && writer.since_checkpoint >= self.options.checkpoint_interval
            && let Err(e) = self.checkpoint_locked(&mut writer, &published)
        {
            // The journal still holds everything; retry at the next interval
            warn!(error = %e, "checkpoint failed");
        }

        Ok(outcomes)
    }

    /// Write a checkpoint of the current snapshot and truncate the journal
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.lock_writer();
        let snapshot = self.snapshot();
        self.checkpoint_locked(&mut writer, &snapshot)
    }

    fn checkpoint_locked(&self, writer: &mut StoreWriter, snapshot: &IndexSnapshot) -> Result<()> {
        if writer.since_checkpoint == 0 && !writer.metadata_dirty && writer.meta.generation == snapshot.generation() {
            return Ok(());
        }

        checkpoint::write(&self.dir, snapshot)?;
        writer.meta.generation = snapshot.generation();
        writer.meta.doc_count = snapshot.document_count() as u32;
        writer.meta.term_count = snapshot.term_count() as u32;
        writer.meta.updated_at = unix_now();
        write_meta(&self.dir, &writer.meta)?;
        writer.journal.truncate()?;
        writer.since_checkpoint = 0;
        writer.metadata_dirty = false;

        info!(
            generation = snapshot.generation(),
            documents = snapshot.document_count(),
            terms = snapshot.term_count(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Drop every document and all persisted state. The generation keeps
    /// increasing so cached results from before the reset are invalidated.
    pub fn reset(&self) -> Result<()> {
        let mut writer = self.lock_writer();
        let generation = self.snapshot().generation() + 1;

        checkpoint::remove(&self.dir)?;
        writer.journal.truncate()?;
        writer.since_checkpoint = 0;
        writer.metadata_dirty = false;

        let created_at = writer.meta.created_at;
        writer.meta = IndexMeta::new(self.root.clone());
        writer.meta.created_at = created_at;
        writer.meta.generation = generation;
        write_meta(&self.dir, &writer.meta)?;

        let mut empty = IndexSnapshot::default();
        empty.set_generation(generation);
        self.publish(Arc::new(empty));
        self.needs_rebuild.store(false, Ordering::SeqCst);

        info!(root = %self.root.display(), generation, "index reset");
        Ok(())
    }

    /// Record that a full reconcile pass completed
    pub fn mark_reconciled(&self) -> Result<()> {
        let mut writer = self.lock_writer();
        writer.meta.last_reconciled_at = Some(unix_now());
        writer.meta.updated_at = unix_now();
        write_meta(&self.dir, &writer.meta)
    }

    fn publish(&self, snapshot: Arc<IndexSnapshot>) {
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, StoreWriter> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Load checkpoint + journal. Any inconsistency surfaces as corruption.
fn load(root: &Path, dir: &Path, options: &StoreOptions) -> Result<(IndexSnapshot, Journal, IndexMeta)> {
    let meta_path = dir.join(META_FILE);
    let meta = if meta_path.exists() {
        let meta: IndexMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;
        if meta.version != INDEX_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: meta.version,
                expected: INDEX_VERSION,
            });
        }
        meta
    } else {
        if checkpoint::exists(dir) {
            return Err(StoreError::corrupt("checkpoint present without meta.json"));
        }
        let meta = IndexMeta::new(root.to_path_buf());
        write_meta(dir, &meta)?;
        meta
    };

    let mut snapshot = match checkpoint::read(dir)? {
        Some(snapshot) => snapshot,
        None => {
            // Nothing checkpointed since the last reset: continue its generation
            let mut empty = IndexSnapshot::default();
            empty.set_generation(meta.generation);
            empty
        }
    };
    let (journal, records) = Journal::open(dir, options.sync_writes)?;

    let base = snapshot.generation();
    let mut replayed = 0usize;
    for record in records {
        let generation = record.generation();
        if generation <= base {
            continue;
        }
        if generation != snapshot.generation() + 1 {
            return Err(StoreError::corrupt(format!(
                "journal jumps from generation {} to {generation}",
                snapshot.generation()
            )));
        }

        match record {
            JournalRecord::Upsert {
                document, content, ..
            } => {
                let terms = build_postings(&content);
                snapshot.insert(IndexedDoc {
                    document,
                    content,
                    terms,
                });
            }
            JournalRecord::Remove { path, .. } => {
                if snapshot.remove(&path).is_none() {
                    return Err(StoreError::corrupt(format!(
                        "journal removes unknown path {}",
                        path.display()
                    )));
                }
            }
        }
        snapshot.set_generation(generation);
        replayed += 1;
    }

    if replayed > 0 {
        debug!(replayed, from = base, to = snapshot.generation(), "journal replayed");
    }
    Ok((snapshot, journal, meta))
}

fn wipe(dir: &Path) -> Result<()> {
    checkpoint::remove(dir)?;
    for name in [crate::index::journal::JOURNAL_FILE, META_FILE] {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Write meta.json atomically (temp file + rename)
fn write_meta(dir: &Path, meta: &IndexMeta) -> Result<()> {
    let tmp = dir.join(format!("{META_FILE}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(meta)?)?;
    fs::rename(&tmp, dir.join(META_FILE))?;
    Ok(())
}
