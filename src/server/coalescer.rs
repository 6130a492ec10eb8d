//! Coalescing of raw file system events into settled changes
//!
//! Editors and tools produce bursts of create/write/rename events for a single
//! save. The coalescer keeps one pending entry per path, pushes its deadline
//! out on every event, and only hands the path on once it has been quiet for
//! the whole window. A path that is both written and removed within one window
//! settles as whichever happened last.

use crate::index::types::{ChangeKind, FileChange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of time for deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone)]
pub struct VirtualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward; clones share the same timeline
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *offset += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

/// Raw event kinds as reported by the watcher or the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Created,
    Written,
    /// Moved into the workspace (or to this name)
    RenamedIn,
    Deleted,
    /// Moved out of the workspace (or away from this name)
    RenamedOut,
}

impl RawEventKind {
    /// The intent this event expresses
    pub fn intent(self) -> ChangeKind {
        match self {
            RawEventKind::Created | RawEventKind::Written | RawEventKind::RenamedIn => ChangeKind::Modified,
            RawEventKind::Deleted | RawEventKind::RenamedOut => ChangeKind::Removed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: ChangeKind,
    deadline: Instant,
}

/// Per-path deadline map drained by a single sweeping timer
pub struct ChangeCoalescer {
    clock: Arc<dyn Clock>,
    quiet: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl ChangeCoalescer {
    pub fn new(clock: Arc<dyn Clock>, quiet: Duration) -> Self {
        Self {
            clock,
            quiet,
            pending: HashMap::new(),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet
    }

    /// Record an event, replacing the path's intent and restarting its window
    pub fn observe(&mut self, path: &Path, event: RawEventKind) {
        let deadline = self.clock.now() + self.quiet;
        let kind = event.intent();
        match self.pending.get_mut(path) {
            Some(entry) => {
                entry.kind = kind;
                entry.deadline = deadline;
            }
            None => {
                self.pending.insert(path.to_path_buf(), Pending { kind, deadline });
            }
        }
    }

    /// Take every change whose window has elapsed, by deadline then path
    pub fn settle(&mut self) -> Vec<FileChange> {
        let now = self.clock.now();
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(path, entry)| (entry.deadline, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, path)| {
                self.pending
                    .remove(&path)
                    .map(|entry| FileChange { path, kind: entry.kind })
            })
            .collect()
    }

    /// Take everything regardless of deadlines (used on shutdown)
    pub fn drain_all(&mut self) -> Vec<FileChange> {
        let mut all: Vec<(Instant, PathBuf, ChangeKind)> = self
            .pending
            .drain()
            .map(|(path, entry)| (entry.deadline, path, entry.kind))
            .collect();
        all.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        all.into_iter()
            .map(|(_, path, kind)| FileChange { path, kind })
            .collect()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// How long the sweeper may sleep before something is due
    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
