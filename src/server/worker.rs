//! The single writer
//!
//! One thread drains settled changes and reconcile requests in order and is
//! the only code path in the service that mutates the index. A failure on one
//! path is logged and counted; corruption discovered mid-write resets the
//! store and rebuilds it from the disk.

use crate::error::StoreError;
use crate::index::reconcile::{apply_change, rebuild, reconcile, ChangeOutcome, ReconcileReport};
use crate::index::store::IndexStore;
use crate::index::types::{FileChange, UpsertOutcome};
use crate::utils::filter::DocumentFilter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type ReconcileReply = Sender<anyhow::Result<ReconcileReport>>;

/// Work queued for the writer
#[derive(Debug)]
pub enum Job {
    /// Bring one settled path in line with the disk
    Apply(FileChange),
    /// Reconcile a scope (relative to the root; empty for everything)
    Reconcile {
        scope: PathBuf,
        reply: Option<ReconcileReply>,
    },
    /// Reset and reconcile everything
    Rebuild { reply: Option<ReconcileReply> },
    /// Checkpoint and exit
    Stop,
}

/// Counters kept by the worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub indexed: AtomicU64,
    pub unchanged: AtomicU64,
    pub removed: AtomicU64,
    pub ignored: AtomicU64,
    pub reconciles: AtomicU64,
    pub rebuilds: AtomicU64,
    pub failures: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub indexed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub ignored: u64,
    pub reconciles: u64,
    pub rebuilds: u64,
    pub failures: u64,
}

impl WorkerStats {
    pub fn counts(&self) -> WorkerCounts {
        WorkerCounts {
            indexed: self.indexed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            reconciles: self.reconciles.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn record_report(&self, report: &ReconcileReport) {
        self.indexed.fetch_add((report.added + report.updated) as u64, Ordering::Relaxed);
        self.removed.fetch_add(report.removed as u64, Ordering::Relaxed);
        self.unchanged.fetch_add(report.unchanged as u64, Ordering::Relaxed);
        self.failures.fetch_add(report.failed as u64, Ordering::Relaxed);
    }
}

/// Shared state the worker needs
pub struct WorkerContext {
    pub store: Arc<IndexStore>,
    pub filter: Arc<DocumentFilter>,
    pub stats: Arc<WorkerStats>,
    /// Cancels the running reconcile pass
    pub cancel: Arc<AtomicBool>,
    /// Jobs sent but not yet finished
    pub in_flight: Arc<AtomicUsize>,
}

fn is_corruption(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_corruption)
}

impl WorkerContext {
    /// Drain jobs until `Stop` or until every sender is gone
    pub fn run(self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            let stop = matches!(job, Job::Stop);
            self.handle(job);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if stop {
                break;
            }
        }
        debug!("index worker stopped");
    }

    fn handle(&self, job: Job) {
        match job {
            Job::Apply(change) => self.apply(&change),
            Job::Reconcile { scope, reply } => {
                self.cancel.store(false, Ordering::SeqCst);
                let result = reconcile(&self.store, &self.filter, &scope, &self.cancel, false);
                self.finish_pass(result, reply);
            }
            Job::Rebuild { reply } => {
                self.cancel.store(false, Ordering::SeqCst);
                self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
                let result = rebuild(&self.store, &self.filter, &self.cancel, false);
                self.finish_pass(result, reply);
            }
            Job::Stop => {
                if let Err(e) = self.store.checkpoint() {
                    warn!(error = %e, "final checkpoint failed");
                }
            }
        }
    }

    fn apply(&self, change: &FileChange) {
        match apply_change(&self.store, &self.filter, change, &self.cancel) {
            Ok(ChangeOutcome::Indexed(UpsertOutcome::Unchanged)) => {
                self.stats.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ChangeOutcome::Indexed(_)) => {
                self.stats.indexed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ChangeOutcome::Removed(count)) => {
                self.stats.removed.fetch_add(count as u64, Ordering::Relaxed);
            }
            Ok(ChangeOutcome::Subtree(report)) => {
                self.stats.record_report(&report);
            }
            Ok(ChangeOutcome::Ignored) => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if is_corruption(&e) => {
                warn!(path = %change.path.display(), error = %e, "index corrupted while applying a change, rebuilding");
                self.recover();
            }
            Err(e) => {
                warn!(path = %change.path.display(), error = %e, "failed to apply change");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn finish_pass(&self, result: anyhow::Result<ReconcileReport>, reply: Option<ReconcileReply>) {
        self.stats.reconciles.fetch_add(1, Ordering::Relaxed);
        let result = match result {
            Ok(report) => {
                self.stats.record_report(&report);
                Ok(report)
            }
            Err(e) if is_corruption(&e) => {
                warn!(error = %e, "index corrupted during reconcile, rebuilding");
                self.recover()
            }
            Err(e) => {
                warn!(error = %e, "reconcile failed");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn recover(&self) -> anyhow::Result<ReconcileReport> {
        self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
        let result = rebuild(&self.store, &self.filter, &self.cancel, false);
        match &result {
            Ok(report) => {
                info!(documents = self.store.document_count(), "index rebuilt after corruption");
                self.stats.record_report(report);
            }
            Err(e) => {
                warn!(error = %e, "rebuild failed");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::index::journal::JOURNAL_FILE;
    use crate::index::store::StoreOptions;
    use crate::index::types::ChangeKind;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn context() -> (TempDir, TempDir, WorkerContext) {
        let root = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let store = IndexStore::open(root.path(), index.path(), StoreOptions::default()).unwrap();
        let ctx = WorkerContext {
            store: Arc::new(store),
            filter: Arc::new(DocumentFilter::new(&IndexSettings::default()).unwrap()),
            stats: Arc::new(WorkerStats::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (root, index, ctx)
    }

    fn send(tx: &Sender<Job>, in_flight: &AtomicUsize, job: Job) {
        in_flight.fetch_add(1, Ordering::SeqCst);
        tx.send(job).unwrap();
    }

    #[test]
    fn test_worker_applies_jobs_in_order() {
        let (root, _index, ctx) = context();
        fs::write(root.path().join("a.md"), "login flow").unwrap();

        let store = Arc::clone(&ctx.store);
        let stats = Arc::clone(&ctx.stats);
        let in_flight = Arc::clone(&ctx.in_flight);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || ctx.run(rx));

        let change = |kind| {
            Job::Apply(FileChange {
                path: PathBuf::from("a.md"),
                kind,
            })
        };
        send(&tx, &in_flight, change(ChangeKind::Modified));
        send(&tx, &in_flight, change(ChangeKind::Modified));
        send(&tx, &in_flight, Job::Stop);
        handle.join().unwrap();

        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert!(store.document(Path::new("a.md")).is_some());
        let counts = stats.counts();
        assert_eq!(counts.indexed, 1);
        assert_eq!(counts.unchanged, 1);
    }

    #[test]
    fn test_reconcile_job_replies() {
        let (root, _index, ctx) = context();
        fs::write(root.path().join("a.md"), "one").unwrap();
        fs::write(root.path().join("b.md"), "two").unwrap();

        let in_flight = Arc::clone(&ctx.in_flight);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || ctx.run(rx));

        let (reply_tx, reply_rx) = mpsc::channel();
        send(
            &tx,
            &in_flight,
            Job::Reconcile {
                scope: PathBuf::new(),
                reply: Some(reply_tx),
            },
        );
        let report = reply_rx.recv().unwrap().unwrap();
        assert_eq!(report.added, 2);

        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_failed_change_is_counted_and_worker_continues() {
        let (root, _index, ctx) = context();
        fs::write(root.path().join("ok.md"), "fine").unwrap();

        let store = Arc::clone(&ctx.store);
        let stats = Arc::clone(&ctx.stats);
        let in_flight = Arc::clone(&ctx.in_flight);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || ctx.run(rx));

        send(
            &tx,
            &in_flight,
            Job::Apply(FileChange {
                path: PathBuf::from("../escape.md"),
                kind: ChangeKind::Modified,
            }),
        );
        send(
            &tx,
            &in_flight,
            Job::Apply(FileChange {
                path: PathBuf::from("ok.md"),
                kind: ChangeKind::Modified,
            }),
        );
        send(&tx, &in_flight, Job::Stop);
        handle.join().unwrap();

        assert_eq!(stats.counts().failures, 1);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn test_journal_corrupted_between_writes_triggers_rebuild() {
        let (root, index, ctx) = context();
        fs::write(root.path().join("a.md"), "alpha").unwrap();

        let store = Arc::clone(&ctx.store);
        let stats = Arc::clone(&ctx.stats);
        let in_flight = Arc::clone(&ctx.in_flight);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || ctx.run(rx));

        let apply = |path: &str| {
            Job::Apply(FileChange {
                path: PathBuf::from(path),
                kind: ChangeKind::Modified,
            })
        };
        send(&tx, &in_flight, apply("a.md"));
        while in_flight.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        assert!(store.document(Path::new("a.md")).is_some());

        let mut journal = fs::OpenOptions::new()
            .append(true)
            .open(index.path().join(JOURNAL_FILE))
            .unwrap();
        std::io::Write::write_all(&mut journal, b"clobbered").unwrap();
        drop(journal);

        fs::write(root.path().join("b.md"), "beta").unwrap();
        send(&tx, &in_flight, apply("b.md"));
        send(&tx, &in_flight, Job::Stop);
        handle.join().unwrap();

        let counts = stats.counts();
        assert_eq!(counts.rebuilds, 1);
        assert_eq!(counts.failures, 0);
        assert!(store.document(Path::new("a.md")).is_some());
        assert!(store.document(Path::new("b.md")).is_some());
        drop(store);

        let reopened = IndexStore::open(root.path(), index.path(), StoreOptions::default()).unwrap();
        assert!(!reopened.needs_rebuild());
        assert_eq!(reopened.document_count(), 2);
    }

    #[test]
    fn test_rebuild_job() {
        let (root, _index, ctx) = context();
        fs::write(root.path().join("a.md"), "alpha").unwrap();
        ctx.store.upsert(Path::new("stale.md"), "stale", 1).unwrap();

        let store = Arc::clone(&ctx.store);
        let in_flight = Arc::clone(&ctx.in_flight);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || ctx.run(rx));

        let (reply_tx, reply_rx) = mpsc::channel();
        send(&tx, &in_flight, Job::Rebuild { reply: Some(reply_tx) });
        assert_eq!(reply_rx.recv().unwrap().unwrap().added, 1);
        send(&tx, &in_flight, Job::Stop);
        handle.join().unwrap();

        assert!(store.document(Path::new("stale.md")).is_none());
        assert!(store.document(Path::new("a.md")).is_some());
    }
}
