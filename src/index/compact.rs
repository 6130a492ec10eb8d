use crate::config::Config;
use crate::index::build::open_store;
use crate::index::journal::JOURNAL_FILE;
use crate::index::stats::format_size;
use crate::utils::{find_workspace_root, is_indexed};
use anyhow::{bail, Result};
use std::path::Path;

/// Fold the journal into a fresh checkpoint
pub fn compact_index(start_path: &Path, config: &Config) -> Result<()> {
    let root = find_workspace_root(start_path, config)?;
    if !is_indexed(&root, config)? {
        bail!("No index found. Run 'casefind index' first.");
    }

    let store = open_store(&root, config)?;
    let journal_path = store.index_dir().join(JOURNAL_FILE);
    let before = std::fs::metadata(&journal_path).map(|m| m.len()).unwrap_or(0);

    store.checkpoint()?;

    let after = std::fs::metadata(&journal_path).map(|m| m.len()).unwrap_or(0);
    println!(
        "Compacted journal for {}: {} -> {}",
        root.display(),
        format_size(before),
        format_size(after)
    );
    Ok(())
}
