use crate::config::Config;
use crate::index::reconcile::{rebuild, reconcile, ReconcileReport};
use crate::index::store::{IndexStore, StoreOptions};
use crate::utils::{find_workspace_root, get_index_dir, DocumentFilter};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Open (or create) the index for a workspace root
pub fn open_store(root: &Path, config: &Config) -> Result<IndexStore> {
    let index_path = get_index_dir(root, config)?;
    let options = StoreOptions {
        checkpoint_interval: config.index.checkpoint_interval,
        sync_writes: config.index.sync_writes,
    };
    IndexStore::open(root, &index_path, options)
        .with_context(|| format!("failed to open index at {}", index_path.display()))
}

/// Bring the index for `root` up to date, rebuilding it when forced or corrupt
pub fn build_index(store: &IndexStore, config: &Config, force: bool, show_progress: bool) -> Result<ReconcileReport> {
    let filter = DocumentFilter::new(&config.index).context("invalid document extensions")?;
    let cancel = AtomicBool::new(false);

    let report = if force || store.needs_rebuild() {
        rebuild(store, &filter, &cancel, show_progress)?
    } else {
        reconcile(store, &filter, Path::new(""), &cancel, show_progress)?
    };

    // Fold the journal into a checkpoint so the next open is a plain load
    store.checkpoint()?;
    Ok(report)
}

/// Index the workspace containing `start_path`
pub fn build_index_auto(start_path: &Path, config: &Config, force: bool) -> Result<()> {
    let root = find_workspace_root(start_path, config)?;
    println!("Workspace root: {}", root.display());

    let store = open_store(&root, config)?;
    let report = build_index(&store, config, force, true)?;

    println!("{}", report);
    println!(
        "{} documents, {} terms",
        store.document_count(),
        store.term_count()
    );
    println!("Index stored at: {}", store.index_dir().display());
    if report.failed > 0 {
        eprintln!("({} files could not be read)", report.failed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_build_index_and_force() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.index.index_dir = Some(data.path().to_path_buf());
        fs::write(root.path().join("a.md"), "alpha").unwrap();
        fs::write(root.path().join("b.md"), "beta").unwrap();

        let store = open_store(root.path(), &config).unwrap();
        let report = build_index(&store, &config, false, false).unwrap();
        assert_eq!(report.added, 2);
        assert!(!store.is_first_open());

        let again = build_index(&store, &config, false, false).unwrap();
        assert_eq!(again.changed(), 0);

        let forced = build_index(&store, &config, true, false).unwrap();
        assert_eq!(forced.added, 2);
        assert_eq!(store.document_count(), 2);
    }
}
