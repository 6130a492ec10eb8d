use crate::config::Config;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "casefind";
const CONFIG_FILE: &str = "config.toml";
const META_FILE: &str = "meta.json";

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory for storing indexes
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

fn indexes_dir() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("indexes"))
}

/// Get the index directory for a workspace root, honoring the config override
pub fn get_index_dir(root_path: &Path, config: &Config) -> Result<PathBuf> {
    if let Some(dir) = &config.index.index_dir {
        return Ok(dir.join(hash_path(root_path)));
    }

    let indexes_dir = indexes_dir()?;
    fs::create_dir_all(&indexes_dir)?;
    Ok(indexes_dir.join(hash_path(root_path)))
}

/// Hash a path to create a unique, stable folder name
/// Format: sanitized dir name + first 16 hex chars of the path's SHA-256
fn hash_path(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let dir_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root");

    let sanitized: String = dir_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(16)
        .collect();

    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    format!("{}-{}", sanitized, &hex::encode(digest)[..16])
}

/// Find the workspace root for a path: the nearest ancestor that already has
/// an index, or the path itself
pub fn find_workspace_root(start_path: &Path, config: &Config) -> Result<PathBuf> {
    let start = start_path
        .canonicalize()
        .with_context(|| format!("Invalid path: {}", start_path.display()))?;

    let mut current = Some(start.as_path());
    while let Some(dir) = current {
        if is_indexed(dir, config)? {
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }

    Ok(start)
}

/// Check if a path has an existing index
pub fn is_indexed(root_path: &Path, config: &Config) -> Result<bool> {
    let index_dir = get_index_dir(root_path, config)?;
    Ok(index_dir.join(META_FILE).exists())
}

/// List all indexed workspaces under the index directory
pub fn list_indexed_workspaces(config: &Config) -> Result<Vec<IndexLocation>> {
    let indexes_dir = match &config.index.index_dir {
        Some(dir) => dir.clone(),
        None => indexes_dir()?,
    };

    if !indexes_dir.exists() {
        return Ok(Vec::new());
    }

    let mut workspaces = Vec::new();

    for entry in fs::read_dir(&indexes_dir)? {
        let path = entry?.path();
        let meta_path = path.join(META_FILE);
        if !path.is_dir() || !meta_path.exists() {
            continue;
        }

        // Only the root path is needed, so tolerate metadata from other versions
        let root = fs::File::open(&meta_path)
            .ok()
            .and_then(|file| serde_json::from_reader::<_, serde_json::Value>(file).ok())
            .and_then(|meta| meta.get("root_path").and_then(|v| v.as_str()).map(PathBuf::from));

        if let Some(root_path) = root {
            workspaces.push(IndexLocation {
                root_path,
                index_dir: path,
            });
        }
    }

    workspaces.sort_by(|a, b| a.root_path.cmp(&b.root_path));
    Ok(workspaces)
}

/// Remove the index for a workspace
pub fn remove_index(root_path: &Path, config: &Config) -> Result<bool> {
    let index_dir = get_index_dir(root_path, config)?;
    if index_dir.exists() {
        fs::remove_dir_all(&index_dir)
            .with_context(|| format!("Failed to remove {}", index_dir.display()))?;
        return Ok(true);
    }
    Ok(false)
}

/// Information about an indexed workspace
#[derive(Debug, Clone)]
pub struct IndexLocation {
    pub root_path: PathBuf,
    pub index_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.index.index_dir = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn test_hash_path() {
        let hash1 = hash_path(Path::new("/home/user/project"));
        let hash2 = hash_path(Path::new("/home/user/project"));
        let hash3 = hash_path(Path::new("/home/user/other"));

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert!(hash1.starts_with("project-"));
    }

    #[test]
    fn test_index_dir_override() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        let dir = get_index_dir(Path::new("/srv/cases"), &config).unwrap();
        assert!(dir.starts_with(tmp.path()));
    }

    #[test]
    fn test_list_and_remove() {
        let indexes = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let config = config_in(indexes.path());

        let index_dir = get_index_dir(workspace.path(), &config).unwrap();
        fs::create_dir_all(&index_dir).unwrap();
        fs::write(
            index_dir.join(META_FILE),
            serde_json::json!({ "root_path": workspace.path() }).to_string(),
        )
        .unwrap();

        assert!(is_indexed(workspace.path(), &config).unwrap());
        let listed = list_indexed_workspaces(&config).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].root_path, workspace.path());

        assert!(remove_index(workspace.path(), &config).unwrap());
        assert!(!is_indexed(workspace.path(), &config).unwrap());
        assert!(!remove_index(workspace.path(), &config).unwrap());
    }

    #[test]
    fn test_find_workspace_root_prefers_indexed_ancestor() {
        let indexes = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let config = config_in(indexes.path());
        let nested = workspace.path().join("suite").join("login");
        fs::create_dir_all(&nested).unwrap();

        // Nothing indexed yet: the path itself is the root
        let root = find_workspace_root(&nested, &config).unwrap();
        assert_eq!(root, nested.canonicalize().unwrap());

        let canonical = workspace.path().canonicalize().unwrap();
        let index_dir = get_index_dir(&canonical, &config).unwrap();
        fs::create_dir_all(&index_dir).unwrap();
        fs::write(index_dir.join(META_FILE), "{}").unwrap();

        let root = find_workspace_root(&nested, &config).unwrap();
        assert_eq!(root, canonical);
    }
}
