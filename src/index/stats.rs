use crate::config::Config;
use crate::index::store::{IndexStore, StoreOptions};
use crate::utils::{find_workspace_root, get_index_dir, is_indexed, list_indexed_workspaces};
use anyhow::{bail, Result};
use std::path::Path;

/// Display index statistics
pub fn show_stats(start_path: &Path, config: &Config) -> Result<()> {
    let root = find_workspace_root(start_path, config)?;
    if !is_indexed(&root, config)? {
        bail!("{} is not indexed; run `casefind index` first", root.display());
    }
    let index_path = get_index_dir(&root, config)?;
    let store = IndexStore::open(&root, &index_path, StoreOptions::default())?;
    let meta = store.meta();
    let snapshot = store.snapshot();

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Root path:        {}", root.display());
    println!("Index location:   {}", index_path.display());
    println!("Index version:    {}", meta.version);
    println!("Generation:       {}", snapshot.generation());
    println!("Document count:   {}", snapshot.document_count());
    println!("Term count:       {}", snapshot.term_count());

    let content_bytes: u64 = snapshot.documents().map(|doc| doc.size).sum();
    println!("Indexed content:  {}", format_size(content_bytes));

    // Most common terms by document frequency
    let mut terms: Vec<(&str, u64)> = snapshot.terms().map(|(term, docs)| (term, docs.len())).collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if !terms.is_empty() {
        println!();
        println!("Most common terms:");
        for (term, count) in terms.iter().take(10) {
            println!("  {:15} {}", term, count);
        }
    }

    if let Ok(size) = dir_size(&index_path) {
        println!();
        println!("Index size:       {}", format_size(size));
    }

    println!();
    println!("Created:          {}", format_timestamp(meta.created_at));
    println!("Updated:          {}", format_timestamp(meta.updated_at));
    match meta.last_reconciled_at {
        Some(ts) => println!("Reconciled:       {}", format_timestamp(ts)),
        None => println!("Reconciled:       never"),
    }

    Ok(())
}

/// List all indexed workspaces
pub fn list_indexes(config: &Config) -> Result<()> {
    let workspaces = list_indexed_workspaces(config)?;

    if workspaces.is_empty() {
        println!("No indexed workspaces found.");
        return Ok(());
    }

    println!("Indexed Workspaces");
    println!("==================");
    println!();

    for workspace in workspaces {
        let status = if workspace.root_path.exists() { "" } else { " [missing]" };
        println!("  {}{}", workspace.root_path.display(), status);
        println!("    Index: {}", workspace.index_dir.display());
        println!();
    }

    Ok(())
}

/// Calculate directory size recursively
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                size += entry.metadata()?.len();
            } else if path.is_dir() {
                size += dir_size(&path)?;
            }
        }
    }
    Ok(size)
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_timestamp(ts: u64) -> String {
    use std::time::{Duration, UNIX_EPOCH};
    let datetime = UNIX_EPOCH + Duration::from_secs(ts);
    format!("{:?}", datetime)
}
