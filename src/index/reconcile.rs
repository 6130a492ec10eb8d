//! Bringing the index in line with the file system.
//!
//! A reconcile pass walks a scope, compares each document's modification time
//! and size against the index, and applies the difference: new and changed
//! files are read, hashed and segmented in parallel, then committed in chunks
//! through the single-writer store. Indexed documents whose file is gone are
//! removed. Passes are idempotent and can be cancelled between files.
//!
//! A chunk the store refuses (for anything short of corruption) is retried one
//! file at a time, so a single bad file costs itself and nothing else. Files
//! whose names are not valid UTF-8 cannot be stored and are counted as failed.

use crate::index::snapshot::prepare_bytes;
use crate::index::store::{IndexStore, Mutation, MutationOutcome};
use crate::index::types::{FileChange, UpsertOutcome};
use crate::utils::filter::{mtime_nanos, DocumentFilter, FoundFile};
use crate::utils::progress::Progress;
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Files prepared in parallel before each commit
const CHUNK_SIZE: usize = 256;

/// Summary of a reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Documents found on disk
    pub scanned: usize,
    pub added: usize,
    pub updated: usize,
    /// Skipped by mtime/size, or read but with identical content
    pub unchanged: usize,
    pub removed: usize,
    /// Files that could not be read (and were dropped from the index) or
    /// could not be stored
    pub failed: usize,
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.added + self.updated + self.removed
    }

    fn tally(&mut self, outcomes: &[MutationOutcome]) {
        for outcome in outcomes {
            match outcome {
                MutationOutcome::Upserted(UpsertOutcome::Inserted) => self.added += 1,
                MutationOutcome::Upserted(UpsertOutcome::Updated) => self.updated += 1,
                MutationOutcome::Upserted(UpsertOutcome::Unchanged) => self.unchanged += 1,
                MutationOutcome::Removed => self.removed += 1,
                MutationOutcome::Absent => {}
            }
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scanned, {} added, {} updated, {} removed, {} unchanged",
            self.scanned, self.added, self.updated, self.removed, self.unchanged
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        write!(f, " in {:.2?}", self.elapsed)
    }
}

/// Resolve a scope (absolute under the root, or root-relative) to a relative path
pub fn relative_scope(root: &Path, scope: &Path) -> Result<PathBuf> {
    let rel = if scope.is_absolute() {
        match scope.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => bail!("{} is outside the workspace {}", scope.display(), root.display()),
        }
    } else {
        scope.to_path_buf()
    };

    let mut normalized = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => bail!("{} is outside the workspace {}", scope.display(), root.display()),
        }
    }
    Ok(normalized)
}

/// Read one file into the mutation that brings the index in line with it.
/// An unreadable file becomes a removal; the flag reports that.
fn read_mutation(file: &FoundFile) -> (Mutation, bool) {
    match fs::read(&file.abs_path) {
        Ok(bytes) => (Mutation::Upsert(prepare_bytes(&file.rel_path, bytes, file.mtime)), false),
        Err(e) => {
            debug!(path = %file.rel_path.display(), error = %e, "unreadable, dropping from index");
            (Mutation::Remove(file.rel_path.clone()), true)
        }
    }
}

/// Reconcile `scope` (the root, a directory below it or a single file)
/// against the disk
pub fn reconcile(
    store: &IndexStore,
    filter: &DocumentFilter,
    scope: &Path,
    cancel: &AtomicBool,
    show_progress: bool,
) -> Result<ReconcileReport> {
    let started = Instant::now();
    let root = store.root().to_path_buf();
    let rel_scope = relative_scope(&root, scope)?;
    let abs_scope = root.join(&rel_scope);
    let mut report = ReconcileReport::default();

    let spinner = Progress::spinner(show_progress, "Discovering files...");
    let found = if abs_scope.exists() {
        filter.walk(&root, &abs_scope)
    } else {
        Vec::new()
    };
    spinner.finish(format!("Found {} documents", found.len()));
    report.scanned = found.len();

    let snapshot = store.snapshot();
    let seen: HashSet<&Path> = found.iter().map(|f| f.rel_path.as_path()).collect();
    let gone: Vec<Mutation> = snapshot
        .paths_under(&rel_scope)
        .into_iter()
        .filter(|path| !seen.contains(path.as_path()))
        .map(Mutation::Remove)
        .collect();

    let (valid, invalid): (Vec<&FoundFile>, Vec<&FoundFile>) =
        found.iter().partition(|file| file.rel_path.to_str().is_some());
    for file in &invalid {
        warn!(path = %file.rel_path.display(), "file name is not valid UTF-8, skipping");
    }
    report.failed = invalid.len();

    let changed: Vec<&FoundFile> = valid
        .iter()
        .copied()
        .filter(|file| match snapshot.document(&file.rel_path) {
            Some(doc) => doc.mtime != file.mtime || doc.size != file.size,
            None => true,
        })
        .collect();
    report.unchanged = valid.len() - changed.len();
    drop(snapshot);

    if !gone.is_empty() {
        let outcomes = store.apply(gone)?;
        report.tally(&outcomes);
    }

    let bar = Progress::bar(show_progress, changed.len() as u64, "Indexing documents...");

    for chunk in changed.chunks(CHUNK_SIZE) {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let prepared: Vec<(Mutation, bool)> = chunk
            .par_iter()
            .filter_map(|file| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let item = read_mutation(file);
                bar.inc(1);
                Some(item)
            })
            .collect();
        let unreadable = prepared.iter().filter(|(_, unreadable)| *unreadable).count();
        let mutations = prepared.into_iter().map(|(mutation, _)| mutation).collect();

        match store.apply(mutations) {
            Ok(outcomes) => {
                report.tally(&outcomes);
                report.failed += unreadable;
            }
            Err(e) if e.is_corruption() => return Err(e.into()),
            Err(e) => {
                warn!(files = chunk.len(), error = %e, "batch commit failed, retrying file by file");
                commit_each(store, chunk, cancel, &mut report)?;
            }
        }
    }

    report.cancelled = cancel.load(Ordering::Relaxed);
    report.elapsed = started.elapsed();
    bar.finish(format!("Indexed {} documents", report.added + report.updated));

    if !report.cancelled && rel_scope.as_os_str().is_empty() {
        store.mark_reconciled()?;
    }

    info!(
        root = %root.display(),
        scope = %rel_scope.display(),
        scanned = report.scanned,
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        unchanged = report.unchanged,
        failed = report.failed,
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "reconcile finished"
    );

    Ok(report)
}

/// Commit files one at a time after their batch was refused
fn commit_each(
    store: &IndexStore,
    files: &[&FoundFile],
    cancel: &AtomicBool,
    report: &mut ReconcileReport,
) -> Result<()> {
    for file in files {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let (mutation, unreadable) = read_mutation(file);
        match store.apply(vec![mutation]) {
            Ok(outcomes) => {
                report.tally(&outcomes);
                report.failed += usize::from(unreadable);
            }
            Err(e) if e.is_corruption() => return Err(e.into()),
            Err(e) => {
                warn!(path = %file.rel_path.display(), error = %e, "failed to index file");
                report.failed += 1;
            }
        }
    }
    Ok(())
}

/// Discard the index and rebuild it from the whole workspace
pub fn rebuild(
    store: &IndexStore,
    filter: &DocumentFilter,
    cancel: &AtomicBool,
    show_progress: bool,
) -> Result<ReconcileReport> {
    store.reset()?;
    reconcile(store, filter, Path::new(""), cancel, show_progress)
}

/// What applying one settled change did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Indexed(UpsertOutcome),
    /// Documents dropped (one for a file, several for a directory)
    Removed(usize),
    /// The path is a directory that was reconciled
    Subtree(ReconcileReport),
    /// Not a document and nothing indexed under it
    Ignored,
}

/// Bring one path in line with the disk.
///
/// The disk is authoritative: a `modified` intent for a file that has vanished
/// removes it, a `removed` intent for a file that is back reindexes it. A
/// directory is reconciled as a subtree; a vanished directory drops every
/// document below it.
pub fn apply_change(
    store: &IndexStore,
    filter: &DocumentFilter,
    change: &FileChange,
    cancel: &AtomicBool,
) -> Result<ChangeOutcome> {
    let rel = relative_scope(store.root(), &change.path)?;
    if rel.to_str().is_none() {
        bail!("path is not valid UTF-8: {}", rel.display());
    }
    if rel.as_os_str().is_empty() {
        return Ok(ChangeOutcome::Subtree(reconcile(store, filter, &rel, cancel, false)?));
    }
    if filter.is_excluded(&rel) {
        return Ok(ChangeOutcome::Ignored);
    }

    let abs = store.root().join(&rel);
    match fs::metadata(&abs) {
        Ok(meta) if meta.is_dir() => {
            return Ok(ChangeOutcome::Subtree(reconcile(store, filter, &rel, cancel, false)?));
        }
        Ok(meta) if meta.is_file() && filter.is_document(&rel) && filter.accepts_size(meta.len()) => {
            match fs::read(&abs) {
                Ok(bytes) => {
                    let outcome = store.commit(prepare_bytes(&rel, bytes, mtime_nanos(&meta)))?;
                    debug!(path = %rel.display(), kind = ?change.kind, ?outcome, "change applied");
                    return Ok(ChangeOutcome::Indexed(outcome));
                }
                Err(e) => {
                    debug!(path = %rel.display(), error = %e, "unreadable, treating as removed");
                }
            }
        }
        _ => {}
    }

    let snapshot = store.snapshot();
    let doomed: Vec<Mutation> = if snapshot.document(&rel).is_some() {
        vec![Mutation::Remove(rel.clone())]
    } else {
        snapshot.paths_under(&rel).into_iter().map(Mutation::Remove).collect()
    };
    drop(snapshot);

    if doomed.is_empty() {
        return Ok(ChangeOutcome::Ignored);
    }

    let removed = store
        .apply(doomed)?
        .iter()
        .filter(|o| matches!(o, MutationOutcome::Removed))
        .count();
    debug!(path = %rel.display(), kind = ?change.kind, removed, "change applied");
    Ok(ChangeOutcome::Removed(removed))
}
