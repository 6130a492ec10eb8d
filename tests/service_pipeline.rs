//! The live pipeline: notifications, coalescing, the worker and snapshot reads.

mod fixtures;

use casefind::config::Config;
use casefind::server::{IndexService, SystemClock, VirtualClock};
use fixtures::{hit_paths, seed_cases, Workspace};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IDLE: Duration = Duration::from_secs(30);

fn start(ws: &Workspace, clock: &VirtualClock) -> IndexService {
    let service = IndexService::start_with(&ws.root(), &ws.index_dir(), &ws.config, Arc::new(clock.clone())).unwrap();
    assert!(service.wait_idle(IDLE));
    service
}

fn settle(service: &IndexService, clock: &VirtualClock) {
    clock.advance(Duration::from_secs(2));
    service.tick();
    assert!(service.wait_idle(IDLE));
}

#[test]
fn rapid_notifications_reindex_once() {
    let ws = Workspace::new();
    let clock = VirtualClock::new();
    let service = start(&ws, &clock);

    for i in 0..50 {
        ws.write("draft.md", &format!("draft revision {i}"));
        service.notify_file_changed(&ws.path("draft.md"));
        clock.advance(Duration::from_millis(100));
        service.tick();
    }
    assert!(service.search("draft", None).is_empty());

    settle(&service, &clock);
    assert_eq!(service.status().counts.indexed, 1);
    assert_eq!(hit_paths(&service.search("49", None)), ["draft.md"]);
    assert!(service.search("48", None).is_empty());
}

#[test]
fn startup_reconcile_indexes_existing_tree() {
    let ws = Workspace::new();
    seed_cases(&ws);
    let clock = VirtualClock::new();
    let service = start(&ws, &clock);

    assert_eq!(service.documents().len(), 4);
    assert_eq!(hit_paths(&service.search("试用", None)), ["cn/登录.md"]);
}

#[test]
fn removal_by_notification() {
    let ws = Workspace::new();
    seed_cases(&ws);
    let clock = VirtualClock::new();
    let service = start(&ws, &clock);

    ws.remove("auth/login.md");
    service.notify_file_removed(Path::new("auth/login.md"));
    settle(&service, &clock);

    assert!(service.search("login", None).is_empty());
    assert_eq!(service.documents().len(), 3);
}

#[test]
fn rename_moves_document() {
    let ws = Workspace::new();
    seed_cases(&ws);
    let clock = VirtualClock::new();
    let service = start(&ws, &clock);

    std::fs::rename(ws.path("auth/reset.md"), ws.path("auth/password-reset.md")).unwrap();
    service.notify_file_removed(Path::new("auth/reset.md"));
    service.notify_file_changed(Path::new("auth/password-reset.md"));
    settle(&service, &clock);

    assert_eq!(hit_paths(&service.search("reset link", None)), ["auth/password-reset.md"]);
}

#[test]
fn snapshot_reads_during_writes() {
    let ws = Workspace::new();
    let clock = VirtualClock::new();
    let service = Arc::new(start(&ws, &clock));

    let reader = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            // Every observed result set must be internally consistent
            for _ in 0..200 {
                for hit in service.search("stable", Some(100)) {
                    assert!(hit.score >= 1);
                    assert!(!hit.snippets.is_empty());
                }
            }
        })
    };

    for i in 0..40 {
        ws.write(&format!("case_{i}.md"), "stable content");
        service.notify_file_changed(Path::new(&format!("case_{i}.md")));
    }
    settle(&service, &clock);
    reader.join().unwrap();

    assert_eq!(service.search("stable", Some(100)).len(), 40);
}

#[test]
fn reopening_keeps_the_index() {
    let ws = Workspace::new();
    seed_cases(&ws);
    let clock = VirtualClock::new();
    let before = {
        let service = start(&ws, &clock);
        hit_paths(&service.search("password", None))
    };

    let service = start(&ws, &clock);
    assert_eq!(hit_paths(&service.search("password", None)), before);
    assert_eq!(service.status().counts.indexed, 0);
}

#[test]
fn watcher_picks_up_changes() {
    let ws = Workspace::new();
    let mut config: Config = ws.config.clone();
    config.watcher.enabled = true;
    config.watcher.quiet_ms = 50;

    let service = IndexService::start_with(&ws.root(), &ws.index_dir(), &config, Arc::new(SystemClock)).unwrap();
    if !service.is_watching() {
        // No file notification backend available here
        return;
    }
    assert!(service.wait_idle(IDLE));

    ws.write("live/new.md", "watched content");
    let deadline = Instant::now() + IDLE;
    while service.search("watched", None).is_empty() {
        assert!(Instant::now() < deadline, "change was never indexed");
        thread::sleep(Duration::from_millis(20));
    }

    ws.remove("live/new.md");
    while !service.search("watched", None).is_empty() {
        assert!(Instant::now() < deadline, "removal was never applied");
        thread::sleep(Duration::from_millis(20));
    }
}
