//! File system watching
//!
//! Translates `notify` events into raw events for the coalescer. The watcher
//! callback only forwards; it never touches the index.

use crate::server::coalescer::RawEventKind;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, warn};

/// Messages consumed by the coalescer thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Something happened to a path (relative to the root)
    Fs { path: PathBuf, kind: RawEventKind },
    /// Events were lost; the whole tree must be reconciled
    Rescan,
    /// Wake the sweeper so it re-reads the clock
    Tick,
    /// Flush everything pending and stop
    Shutdown,
}

/// Sending side of the raw event channel.
///
/// Counts messages in flight so the service can tell when the pipeline is idle.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<WatchEvent>,
    in_flight: Arc<AtomicUsize>,
}

impl EventSink {
    pub fn new(tx: Sender<WatchEvent>, in_flight: Arc<AtomicUsize>) -> Self {
        Self { tx, in_flight }
    }

    /// Returns false once the receiving side has shut down
    pub fn send(&self, event: WatchEvent) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// Map one `notify` event onto raw events with root-relative paths
pub fn translate(event: &Event, root: &Path) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![WatchEvent::Rescan];
    }

    let relative = |path: &PathBuf| -> Option<PathBuf> {
        let rel = path.strip_prefix(root).ok()?;
        (!rel.as_os_str().is_empty()).then(|| rel.to_path_buf())
    };
    let each = |kind: RawEventKind| -> Vec<WatchEvent> {
        event
            .paths
            .iter()
            .filter_map(relative)
            .map(|path| WatchEvent::Fs { path, kind })
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => each(RawEventKind::Created),
        EventKind::Remove(_) => each(RawEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(RawEventKind::RenamedOut),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(RawEventKind::RenamedIn),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            let mut paths = event.paths.iter();
            if let Some(from) = paths.next().and_then(relative) {
                out.push(WatchEvent::Fs {
                    path: from,
                    kind: RawEventKind::RenamedOut,
                });
            }
            if let Some(to) = paths.next().and_then(relative) {
                out.push(WatchEvent::Fs {
                    path: to,
                    kind: RawEventKind::RenamedIn,
                });
            }
            out
        }
        // Backends that cannot tell the two sides of a rename apart
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|path| {
                let kind = if path.exists() {
                    RawEventKind::RenamedIn
                } else {
                    RawEventKind::RenamedOut
                };
                relative(path).map(|path| WatchEvent::Fs { path, kind })
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => each(RawEventKind::Written),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// Watch `root` recursively, forwarding translated events to `sink`.
///
/// The watcher stops when the returned handle is dropped.
pub fn start_fs_watcher(root: &Path, sink: EventSink) -> notify::Result<RecommendedWatcher> {
    let watch_root = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in translate(&event, &watch_root) {
                    debug!(event = ?raw, "watch");
                    sink.send(raw);
                }
            }
            Err(e) => {
                warn!(error = %e, "watcher error, scheduling a rescan");
                sink.send(WatchEvent::Rescan);
            }
        },
        notify::Config::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "watching for changes");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
    use std::sync::mpsc;

    fn root() -> PathBuf {
        PathBuf::from("/ws")
    }

    fn fs(path: &str, kind: RawEventKind) -> WatchEvent {
        WatchEvent::Fs {
            path: PathBuf::from(path),
            kind,
        }
    }

    #[test]
    fn test_translate_create_write_remove() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(root().join("a.md"));
        assert_eq!(translate(&create, &root()), vec![fs("a.md", RawEventKind::Created)]);

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(root().join("dir/b.md"));
        assert_eq!(translate(&write, &root()), vec![fs("dir/b.md", RawEventKind::Written)]);

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(root().join("a.md"));
        assert_eq!(translate(&remove, &root()), vec![fs("a.md", RawEventKind::Deleted)]);
    }

    #[test]
    fn test_translate_renames() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root().join("old.md"))
            .add_path(root().join("new.md"));
        assert_eq!(
            translate(&both, &root()),
            vec![fs("old.md", RawEventKind::RenamedOut), fs("new.md", RawEventKind::RenamedIn)]
        );

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root().join("gone.md"));
        assert_eq!(translate(&from, &root()), vec![fs("gone.md", RawEventKind::RenamedOut)]);

        // Moved out of the watched tree: only the source side is inside
        let out_of_tree = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root().join("leaving.md"))
            .add_path(PathBuf::from("/elsewhere/leaving.md"));
        assert_eq!(
            translate(&out_of_tree, &root()),
            vec![fs("leaving.md", RawEventKind::RenamedOut)]
        );
    }

    #[test]
    fn test_translate_ignores_outside_and_access() {
        let outside = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/other/a.md"));
        assert!(translate(&outside, &root()).is_empty());

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(root().join("a.md"));
        assert!(translate(&access, &root()).is_empty());

        let the_root = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(root());
        assert!(translate(&the_root, &root()).is_empty());
    }

    #[test]
    fn test_translate_rescan() {
        let rescan = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(&rescan, &root()), vec![WatchEvent::Rescan]);
    }

    #[test]
    fn test_event_sink_counts_in_flight() {
        let (tx, rx) = mpsc::channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let sink = EventSink::new(tx, Arc::clone(&in_flight));

        assert!(sink.send(WatchEvent::Tick));
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);

        drop(rx);
        assert!(!sink.send(WatchEvent::Tick));
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);
    }
}
