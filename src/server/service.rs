//! The in-process index service
//!
//! Wires the pieces into a pipeline:
//!
//! ```text
//! notify / host ──raw events──▶ sweeper (coalescer) ──jobs──▶ worker ──▶ IndexStore
//!                                                                           │
//!                              search ◀──────────── Arc<IndexSnapshot> ◀────┘
//! ```
//!
//! The watcher callback and the public `notify_*` calls only enqueue. The
//! sweeper thread owns the coalescer and wakes at the next deadline (or at
//! least every sweep interval). The worker is the single writer. Searches read
//! the current snapshot on the caller's thread or on the rayon pool.

use crate::config::Config;
use crate::index::reconcile::{relative_scope, ReconcileReport};
use crate::index::store::{IndexStore, StoreOptions};
use crate::index::types::{Document, Generation};
use crate::query::engine::{QueryEngine, SearchHit};
use crate::server::coalescer::{ChangeCoalescer, Clock, RawEventKind, SystemClock};
use crate::server::watcher::{start_fs_watcher, EventSink, WatchEvent};
use crate::server::worker::{Job, WorkerContext, WorkerCounts, WorkerStats};
use crate::utils::app_data::get_index_dir;
use crate::utils::filter::DocumentFilter;
use anyhow::{anyhow, Context, Result};
use notify::RecommendedWatcher;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pipeline counters used to detect idleness
#[derive(Debug, Default)]
struct Pipeline {
    /// Raw events sent but not yet observed by the sweeper
    raw: Arc<AtomicUsize>,
    /// Paths waiting out their quiet window
    pending: AtomicUsize,
    /// Jobs sent to the worker but not yet finished
    jobs: Arc<AtomicUsize>,
}

impl Pipeline {
    fn is_idle(&self) -> bool {
        self.raw.load(Ordering::SeqCst) == 0
            && self.pending.load(Ordering::SeqCst) == 0
            && self.jobs.load(Ordering::SeqCst) == 0
    }
}

/// Snapshot of the service state
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub generation: Generation,
    pub documents: usize,
    pub terms: usize,
    pub pending_changes: usize,
    pub queued_jobs: usize,
    pub watching: bool,
    pub counts: WorkerCounts,
}

/// Incremental index and search over one workspace
pub struct IndexService {
    root: PathBuf,
    store: Arc<IndexStore>,
    engine: Arc<QueryEngine>,
    filter: Arc<DocumentFilter>,
    default_max_results: usize,
    sink: EventSink,
    jobs: SyncSender<Job>,
    pipeline: Arc<Pipeline>,
    stats: Arc<WorkerStats>,
    cancel: Arc<AtomicBool>,
    stopped: AtomicBool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexService {
    /// Start the service for `root` with the index in the app data directory
    pub fn start(root: &Path, config: &Config) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace {} not found", root.display()))?;
        let index_dir = get_index_dir(&root, config)?;
        Self::start_with(&root, &index_dir, config, Arc::new(SystemClock))
    }

    /// Start with an explicit index directory and clock
    pub fn start_with(root: &Path, index_dir: &Path, config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace {} not found", root.display()))?;

        let options = StoreOptions {
            checkpoint_interval: config.index.checkpoint_interval,
            sync_writes: config.index.sync_writes,
        };
        let store = Arc::new(
            IndexStore::open(&root, index_dir, options)
                .with_context(|| format!("failed to open index at {}", index_dir.display()))?,
        );
        let filter = Arc::new(DocumentFilter::new(&config.index).context("invalid document extensions")?);
        let engine = Arc::new(QueryEngine::new(Arc::clone(&store), &config.search));

        let pipeline = Arc::new(Pipeline::default());
        let stats = Arc::new(WorkerStats::default());
        let cancel = Arc::new(AtomicBool::new(false));

        let (raw_tx, raw_rx) = mpsc::channel();
        let sink = EventSink::new(raw_tx, Arc::clone(&pipeline.raw));
        let (job_tx, job_rx) = mpsc::sync_channel(config.watcher.queue_capacity.max(1));

        let worker = WorkerContext {
            store: Arc::clone(&store),
            filter: Arc::clone(&filter),
            stats: Arc::clone(&stats),
            cancel: Arc::clone(&cancel),
            in_flight: Arc::clone(&pipeline.jobs),
        };
        let worker_thread = thread::Builder::new()
            .name("casefind-worker".into())
            .spawn(move || worker.run(job_rx))
            .context("failed to spawn index worker")?;

        let sweeper = Sweeper {
            coalescer: ChangeCoalescer::new(clock, config.watcher.quiet_window()),
            sweep_interval: config.watcher.sweep_interval(),
            root: root.clone(),
            store: Arc::clone(&store),
            filter: Arc::clone(&filter),
            jobs: job_tx.clone(),
            pipeline: Arc::clone(&pipeline),
        };
        let sweeper_thread = thread::Builder::new()
            .name("casefind-sweeper".into())
            .spawn(move || sweeper.run(raw_rx))
            .context("failed to spawn change sweeper")?;

        let service = Self {
            root: root.clone(),
            store,
            engine,
            filter,
            default_max_results: config.search.default_max_results,
            sink,
            jobs: job_tx,
            pipeline,
            stats,
            cancel,
            stopped: AtomicBool::new(false),
            watcher: Mutex::new(None),
            threads: Mutex::new(vec![sweeper_thread, worker_thread]),
        };

        if service.store.needs_rebuild() {
            service.submit(Job::Rebuild { reply: None });
        } else {
            service.submit(Job::Reconcile {
                scope: PathBuf::new(),
                reply: None,
            });
        }

        if config.watcher.enabled {
            match start_fs_watcher(&root, service.sink.clone()) {
                Ok(watcher) => {
                    *service.lock_watcher() = Some(watcher);
                }
                Err(e) => warn!(root = %root.display(), error = %e, "file watching unavailable, relying on reconcile"),
            }
        }

        info!(
            root = %root.display(),
            index = %index_dir.display(),
            documents = service.store.document_count(),
            watching = service.is_watching(),
            "index service started"
        );
        Ok(service)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn is_watching(&self) -> bool {
        self.lock_watcher().is_some()
    }

    /// A document was created or written. Never blocks.
    pub fn notify_file_changed(&self, path: &Path) {
        self.notify(path, RawEventKind::Written);
    }

    /// A document was deleted or moved away. Never blocks.
    pub fn notify_file_removed(&self, path: &Path) {
        self.notify(path, RawEventKind::Deleted);
    }

    fn notify(&self, path: &Path, kind: RawEventKind) {
        match self.relative(path) {
            Some(path) if !path.as_os_str().is_empty() => {
                self.sink.send(WatchEvent::Fs { path, kind });
            }
            _ => debug!(path = %path.display(), "ignoring change outside the workspace"),
        }
    }

    /// Make the sweeper re-read its clock now
    pub fn tick(&self) {
        self.sink.send(WatchEvent::Tick);
    }

    /// Queue a reconcile of `scope` (the root, or a path under it)
    pub fn reconcile(&self, scope: &Path) -> Receiver<Result<ReconcileReport>> {
        let (tx, rx) = mpsc::channel();
        match self.relative(scope) {
            Some(scope) => self.submit(Job::Reconcile {
                scope,
                reply: Some(tx),
            }),
            None => {
                let _ = tx.send(Err(anyhow!("{} is outside the workspace", scope.display())));
            }
        }
        rx
    }

    pub fn reconcile_blocking(&self, scope: &Path) -> Result<ReconcileReport> {
        self.reconcile(scope)
            .recv()
            .map_err(|_| anyhow!("index worker stopped"))?
    }

    /// Discard the index and rebuild it from the disk
    pub fn rebuild(&self) -> Receiver<Result<ReconcileReport>> {
        let (tx, rx) = mpsc::channel();
        self.submit(Job::Rebuild { reply: Some(tx) });
        rx
    }

    /// Stop the running reconcile pass after the current file
    pub fn cancel_reconcile(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Search the current snapshot. `max_results` of `None` uses the configured default.
    pub fn search(&self, query: &str, max_results: Option<usize>) -> Vec<SearchHit> {
        self.engine
            .search(query, max_results.unwrap_or(self.default_max_results))
    }

    /// Search on the rayon pool
    pub fn search_in_background(&self, query: &str, max_results: Option<usize>) -> Receiver<Vec<SearchHit>> {
        self.engine.search_in_background(
            query.to_string(),
            max_results.unwrap_or(self.default_max_results),
        )
    }

    /// Indexed documents in path order
    pub fn documents(&self) -> Vec<Document> {
        self.store.snapshot().documents().cloned().collect()
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.store.snapshot();
        ServiceStatus {
            root: self.root.clone(),
            index_dir: self.store.index_dir().to_path_buf(),
            generation: snapshot.generation(),
            documents: snapshot.document_count(),
            terms: snapshot.term_count(),
            pending_changes: self.pipeline.pending.load(Ordering::SeqCst),
            queued_jobs: self.pipeline.jobs.load(Ordering::SeqCst),
            watching: self.is_watching(),
            counts: self.stats.counts(),
        }
    }

    /// Block until nothing is in flight, or until `timeout`. Returns whether idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pipeline.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Flush pending changes, drain the worker and write a checkpoint
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop producing watcher events before flushing
        self.lock_watcher().take();
        self.sink.send(WatchEvent::Shutdown);

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in threads {
            if handle.join().is_err() {
                warn!("index service thread panicked");
            }
        }
        info!(
            root = %self.root.display(),
            documents = self.store.document_count(),
            "index service stopped"
        );
    }

    fn submit(&self, job: Job) {
        self.pipeline.jobs.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(job).is_err() {
            self.pipeline.jobs.fetch_sub(1, Ordering::SeqCst);
            debug!("index worker stopped, job dropped");
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        relative_scope(&self.root, path).ok().or_else(|| {
            // The caller may hold the non-canonical form of the root
            let canonical = path.canonicalize().ok()?;
            relative_scope(&self.root, &canonical).ok()
        })
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<RecommendedWatcher>> {
        self.watcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for IndexService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns the coalescer and turns settled changes into jobs
struct Sweeper {
    coalescer: ChangeCoalescer,
    sweep_interval: Duration,
    root: PathBuf,
    store: Arc<IndexStore>,
    filter: Arc<DocumentFilter>,
    jobs: SyncSender<Job>,
    pipeline: Arc<Pipeline>,
}

impl Sweeper {
    fn run(mut self, events: Receiver<WatchEvent>) {
        loop {
            let wait = self
                .coalescer
                .time_until_next()
                .map_or(self.sweep_interval, |due| due.min(self.sweep_interval));

            match events.recv_timeout(wait) {
                Ok(WatchEvent::Fs { path, kind }) => {
                    if self.is_relevant(&path) {
                        self.coalescer.observe(&path, kind);
                        debug!(path = %path.display(), ?kind, "change observed");
                    }
                    self.pipeline.pending.store(self.coalescer.pending_count(), Ordering::SeqCst);
                    self.pipeline.raw.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(WatchEvent::Rescan) => {
                    info!(root = %self.root.display(), "events were dropped, reconciling the workspace");
                    self.send(Job::Reconcile {
                        scope: PathBuf::new(),
                        reply: None,
                    });
                    self.pipeline.raw.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(WatchEvent::Tick) => {
                    self.pipeline.raw.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(WatchEvent::Shutdown) => {
                    self.pipeline.raw.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            for change in self.coalescer.settle() {
                debug!(path = %change.path.display(), kind = ?change.kind, "change settled");
                self.send(Job::Apply(change));
            }
            self.pipeline.pending.store(self.coalescer.pending_count(), Ordering::SeqCst);
        }

        for change in self.coalescer.drain_all() {
            self.send(Job::Apply(change));
        }
        self.pipeline.pending.store(0, Ordering::SeqCst);
        self.send(Job::Stop);
    }

    /// Documents, directories, and paths with indexed documents below them
    fn is_relevant(&self, rel: &Path) -> bool {
        if self.filter.is_excluded(rel) {
            return false;
        }
        self.filter.is_document(rel)
            || self.root.join(rel).is_dir()
            || self.store.snapshot().has_documents_under(rel)
    }

    fn send(&self, job: Job) {
        self.pipeline.jobs.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(job).is_err() {
            self.pipeline.jobs.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
