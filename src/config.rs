//! Runtime configuration.
//!
//! Loaded with priority: environment variables > `config.toml` in the app data
//! directory > built-in defaults. Every field is optional in the file.
//!
//! ```toml
//! [watcher]
//! quiet_ms = 1000
//!
//! [index]
//! extensions = ["md", "markdown"]
//! skip_dirs = ["archive"]
//!
//! [search]
//! default_max_results = 20
//! ```

use crate::utils::app_data::get_config_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default quiet window before a changed path is reindexed
pub const DEFAULT_QUIET_MS: u64 = 1000;

/// Directories never descended into, on top of hidden ones
pub const DEFAULT_SKIP_DIRS: &[&str] = &[
    ".git",
    ".casefind",
    "__pycache__",
    "node_modules",
    ".vscode",
    ".idea",
    "build",
    "dist",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watcher: WatcherSettings,
    pub index: IndexSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Watch the file system for changes (`casefind watch` and the service)
    pub enabled: bool,
    /// A path must be quiet this long before its change is applied
    pub quiet_ms: u64,
    /// Upper bound on how long the sweeper sleeps between checks
    pub sweep_interval_ms: u64,
    /// Capacity of the queue between the sweeper and the indexing worker
    pub queue_capacity: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_ms: DEFAULT_QUIET_MS,
            sweep_interval_ms: 100,
            queue_capacity: 1024,
        }
    }
}

impl WatcherSettings {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// File extensions treated as documents (case-insensitive, without the dot)
    pub extensions: Vec<String>,
    /// Directory names never descended into
    pub skip_dirs: Vec<String>,
    /// Skip files and directories whose name starts with a dot
    pub skip_hidden: bool,
    /// Files larger than this are not indexed
    pub max_file_size: u64,
    /// Journal records between checkpoints
    pub checkpoint_interval: usize,
    /// fsync the journal after every commit
    pub sync_writes: bool,
    /// Overrides the per-workspace index directory under the app data dir
    pub index_dir: Option<PathBuf>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
            skip_hidden: true,
            max_file_size: 4 * 1024 * 1024,
            checkpoint_interval: 256,
            sync_writes: false,
            index_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_max_results: usize,
    /// Bytes of context on each side of a match in snippets
    pub snippet_radius: usize,
    /// Number of cached query results (0 disables the cache)
    pub cache_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_max_results: 50,
            snippet_radius: 40,
            cache_size: 64,
        }
    }
}

impl Config {
    /// Parse a TOML document, using defaults for anything missing
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn load_from_file() -> Option<Self> {
        let path = get_config_path().ok()?;
        if !path.exists() {
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read config file, using defaults");
                return None;
            }
        };

        match Self::from_toml_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                None
            }
        }
    }

    /// Load config with priority: environment variables > config file > defaults
    pub fn load() -> Self {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `CASEFIND_*` overrides from a variable lookup
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = var("CASEFIND_QUIET_MS").and_then(|v| v.parse().ok()) {
            self.watcher.quiet_ms = ms;
        }
        if let Some(max) = var("CASEFIND_MAX_RESULTS").and_then(|v| v.parse().ok()) {
            self.search.default_max_results = max;
        }
        if let Some(dir) = var("CASEFIND_INDEX_DIR").filter(|v| !v.is_empty()) {
            self.index.index_dir = Some(PathBuf::from(dir));
        }
        if let Some(watch) = var("CASEFIND_WATCH") {
            match watch.to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => self.watcher.enabled = false,
                "1" | "true" | "yes" | "on" => self.watcher.enabled = true,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.watcher.quiet_window(), Duration::from_secs(1));
        assert_eq!(config.index.extensions, ["md"]);
        assert!(config.index.skip_dirs.iter().any(|d| d == "node_modules"));
        assert!(config.index.index_dir.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [watcher]
            quiet_ms = 250

            [index]
            extensions = ["md", "markdown"]
            "#,
        )
        .unwrap();

        assert_eq!(config.watcher.quiet_ms, 250);
        assert_eq!(config.watcher.queue_capacity, 1024);
        assert_eq!(config.index.extensions, ["md", "markdown"]);
        assert!(config.index.skip_hidden);
        assert_eq!(config.search.default_max_results, 50);
    }

    #[test]
    fn test_empty_toml() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.watcher.quiet_ms, DEFAULT_QUIET_MS);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml_str("[watcher]\nquiet_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CASEFIND_QUIET_MS", "20"),
            ("CASEFIND_MAX_RESULTS", "5"),
            ("CASEFIND_INDEX_DIR", "/tmp/casefind-index"),
            ("CASEFIND_WATCH", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.watcher.quiet_ms, 20);
        assert_eq!(config.search.default_max_results, 5);
        assert_eq!(config.index.index_dir, Some(PathBuf::from("/tmp/casefind-index")));
        assert!(!config.watcher.enabled);
    }

    #[test]
    fn test_env_ignores_unparseable_values() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "CASEFIND_QUIET_MS").then(|| "soon".to_string()));
        assert_eq!(config.watcher.quiet_ms, DEFAULT_QUIET_MS);
    }
}
