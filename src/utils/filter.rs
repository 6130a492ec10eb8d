//! Decides which files in a workspace are indexable documents.

use crate::config::IndexSettings;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// A document found while walking a workspace
#[derive(Debug, Clone)]
pub struct FoundFile {
    pub abs_path: PathBuf,
    /// Path relative to the workspace root
    pub rel_path: PathBuf,
    /// Modification time in nanoseconds since the epoch
    pub mtime: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct DocumentFilter {
    names: GlobSet,
    skip_dirs: HashSet<String>,
    skip_hidden: bool,
    max_file_size: u64,
}

impl DocumentFilter {
    pub fn new(settings: &IndexSettings) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for ext in &settings.extensions {
            let ext = ext.trim_start_matches('.');
            builder.add(GlobBuilder::new(&format!("*.{ext}")).case_insensitive(true).build()?);
        }

        Ok(Self {
            names: builder.build()?,
            skip_dirs: settings.skip_dirs.iter().cloned().collect(),
            skip_hidden: settings.skip_hidden,
            max_file_size: settings.max_file_size,
        })
    }

    /// Whether a directory or file name excludes everything below it
    pub fn skips_name(&self, name: &str) -> bool {
        (self.skip_hidden && name.starts_with('.') && name != "." && name != "..")
            || self.skip_dirs.contains(name)
    }

    /// Whether a root-relative path lies inside a skipped or hidden directory,
    /// or escapes the root
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        rel_path.components().any(|component| match component {
            Component::Normal(name) => self.skips_name(&name.to_string_lossy()),
            Component::CurDir => false,
            _ => true,
        })
    }

    /// Whether a root-relative path names an indexable document (by name only)
    pub fn is_document(&self, rel_path: &Path) -> bool {
        if self.is_excluded(rel_path) {
            return false;
        }
        rel_path
            .file_name()
            .is_some_and(|name| self.names.is_match(Path::new(name)))
    }

    pub fn accepts_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }

    /// Walk `scope` (the root, a directory below it or a single file) and
    /// collect documents
    pub fn walk(&self, root: &Path, scope: &Path) -> Vec<FoundFile> {
        let skip_dirs = self.skip_dirs.clone();
        let skip_hidden = self.skip_hidden;

        let walker = WalkBuilder::new(scope)
            .hidden(skip_hidden)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                !skip_dirs.contains(name.as_ref())
            })
            .build();

        walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| {
                let abs_path = entry.path().to_path_buf();
                let rel_path = abs_path.strip_prefix(root).ok()?.to_path_buf();
                if !self.is_document(&rel_path) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if !self.accepts_size(meta.len()) {
                    return None;
                }
                Some(FoundFile {
                    abs_path,
                    rel_path,
                    mtime: mtime_nanos(&meta),
                    size: meta.len(),
                })
            })
            .collect()
    }
}

/// Modification time in nanoseconds since the epoch (0 if unavailable)
pub fn mtime_nanos(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn filter() -> DocumentFilter {
        DocumentFilter::new(&IndexSettings::default()).unwrap()
    }

    #[test]
    fn test_extension_match() {
        let filter = filter();
        assert!(filter.is_document(Path::new("login.md")));
        assert!(filter.is_document(Path::new("suite/LOGIN.MD")));
        assert!(!filter.is_document(Path::new("notes.txt")));
        assert!(!filter.is_document(Path::new("md")));
    }

    #[test]
    fn test_skipped_and_hidden_dirs() {
        let filter = filter();
        assert!(!filter.is_document(Path::new("node_modules/pkg/readme.md")));
        assert!(!filter.is_document(Path::new(".git/info.md")));
        assert!(!filter.is_document(Path::new("suite/.draft.md")));
        assert!(!filter.is_document(Path::new("../outside.md")));
        assert!(filter.is_document(Path::new("./suite/case.md")));
    }

    #[test]
    fn test_custom_extensions() {
        let settings = IndexSettings {
            extensions: vec![".markdown".into(), "txt".into()],
            ..Default::default()
        };
        let filter = DocumentFilter::new(&settings).unwrap();
        assert!(filter.is_document(Path::new("a.markdown")));
        assert!(filter.is_document(Path::new("a.txt")));
        assert!(!filter.is_document(Path::new("a.md")));
    }

    #[test]
    fn test_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("suite/login")).unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("top.md"), "top").unwrap();
        fs::write(root.join("suite/login/ok.md"), "ok").unwrap();
        fs::write(root.join("suite/login/image.png"), "png").unwrap();
        fs::write(root.join("node_modules/dep.md"), "dep").unwrap();
        fs::write(root.join(".hidden/secret.md"), "secret").unwrap();

        let mut found: Vec<_> = filter().walk(root, root).into_iter().map(|f| f.rel_path).collect();
        found.sort();
        assert_eq!(found, [PathBuf::from("suite/login/ok.md"), PathBuf::from("top.md")]);

        let scoped = filter().walk(root, &root.join("suite"));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].rel_path, PathBuf::from("suite/login/ok.md"));
        assert_eq!(scoped[0].size, 2);
    }

    #[test]
    fn test_size_limit() {
        let settings = IndexSettings {
            max_file_size: 4,
            ..Default::default()
        };
        let filter = DocumentFilter::new(&settings).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("small.md"), "abc").unwrap();
        fs::write(tmp.path().join("large.md"), "abcdefgh").unwrap();

        let found = filter.walk(tmp.path(), tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rel_path, PathBuf::from("small.md"));
    }
}
