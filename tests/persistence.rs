//! Durability: reopening, corruption recovery and the command line.

mod fixtures;

use casefind::index::build::{build_index, open_store};
use casefind::index::checkpoint::DOCS_FILE;
use casefind::index::journal::JOURNAL_FILE;
use casefind::query::QueryEngine;
use fixtures::{hit_paths, seed_cases, Workspace};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

fn search(ws: &Workspace, query: &str) -> Vec<String> {
    let store = Arc::new(open_store(&ws.root(), &ws.config).unwrap());
    let engine = QueryEngine::new(store, &ws.config.search);
    hit_paths(&engine.search(query, 100))
}

#[test]
fn reopen_restores_documents_and_generation() {
    let ws = Workspace::new();
    seed_cases(&ws);

    let (generation, documents) = {
        let store = open_store(&ws.root(), &ws.config).unwrap();
        build_index(&store, &ws.config, false, false).unwrap();
        // Leave something in the journal past the checkpoint
        store.upsert(Path::new("extra.md"), "journal only entry", 1).unwrap();
        (store.generation(), store.document_count())
    };

    let store = open_store(&ws.root(), &ws.config).unwrap();
    assert!(!store.needs_rebuild());
    assert_eq!(store.generation(), generation);
    assert_eq!(store.document_count(), documents);
    assert!(store.document(Path::new("extra.md")).is_some());
    assert_eq!(search(&ws, "journal"), ["extra.md"]);
}

#[test]
fn corrupt_journal_is_rebuilt() {
    let ws = Workspace::new();
    seed_cases(&ws);
    {
        let store = open_store(&ws.root(), &ws.config).unwrap();
        build_index(&store, &ws.config, false, false).unwrap();
    }
    let expected = search(&ws, "password");

    fs::write(ws.index_dir().join(JOURNAL_FILE), b"NOTAJOURNAL").unwrap();

    let store = open_store(&ws.root(), &ws.config).unwrap();
    assert!(store.needs_rebuild());
    assert_eq!(store.document_count(), 0);

    build_index(&store, &ws.config, false, false).unwrap();
    assert!(!store.needs_rebuild());
    drop(store);
    assert_eq!(search(&ws, "password"), expected);
}

#[test]
fn corrupt_checkpoint_is_rebuilt() {
    let ws = Workspace::new();
    seed_cases(&ws);
    {
        let store = open_store(&ws.root(), &ws.config).unwrap();
        build_index(&store, &ws.config, false, false).unwrap();
    }
    let expected = search(&ws, "测试");
    assert!(!expected.is_empty());

    let docs = ws.index_dir().join(DOCS_FILE);
    let mut bytes = fs::read(&docs).unwrap();
    bytes.truncate(bytes.len() / 2);
    fs::write(&docs, bytes).unwrap();

    let store = open_store(&ws.root(), &ws.config).unwrap();
    assert!(store.needs_rebuild());
    build_index(&store, &ws.config, false, false).unwrap();
    drop(store);
    assert_eq!(search(&ws, "测试"), expected);
}

fn casefind(ws: &Workspace) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_casefind"));
    cmd.env("CASEFIND_INDEX_DIR", ws.data.path())
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn cli_index_then_search_json() {
    let ws = Workspace::new();
    seed_cases(&ws);

    let output = casefind(&ws).arg("index").arg(ws.root()).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("4 documents"), "{stdout}");

    let output = casefind(&ws)
        .args(["search", "--json", "--no-refresh", "-p"])
        .arg(ws.root())
        .args(["password", "reset"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let hits: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["path"], "auth/reset.md");
    assert_eq!(hits[0]["score"], 4);
}

#[test]
fn cli_search_sees_edits_without_explicit_index() {
    let ws = Workspace::new();
    seed_cases(&ws);

    let run = |query: &str| {
        let output = casefind(&ws)
            .args(["search", "-l", "--no-color", "-p"])
            .arg(ws.root())
            .arg(query)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).into_owned()
    };

    assert!(run("coupon").trim().is_empty());
    ws.write("cn/支付.md", "Pay with a coupon");
    assert_eq!(run("coupon").trim(), "cn/支付.md");
}
