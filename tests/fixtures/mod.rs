//! Shared helpers for integration tests

#![allow(dead_code)]

use casefind::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch workspace with its own index directory
pub struct Workspace {
    pub root: TempDir,
    pub data: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create workspace dir");
        let data = TempDir::new().expect("Failed to create data dir");
        let mut config = Config::default();
        config.index.index_dir = Some(data.path().to_path_buf());
        config.watcher.enabled = false;
        config.watcher.sweep_interval_ms = 5;
        Self { root, data, config }
    }

    /// Canonical workspace root
    pub fn root(&self) -> PathBuf {
        self.root.path().canonicalize().expect("Failed to canonicalize root")
    }

    /// Index directory used by the store for this workspace
    pub fn index_dir(&self) -> PathBuf {
        casefind::utils::get_index_dir(&self.root(), &self.config).expect("Failed to resolve index dir")
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(rel);
        fs::create_dir_all(path.parent().expect("file has a parent")).expect("Failed to create dirs");
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.root.path().join(rel)).expect("Failed to remove file");
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }
}

/// Sorted result paths as strings with `/` separators
pub fn hit_paths(hits: &[casefind::query::SearchHit]) -> Vec<String> {
    let mut paths: Vec<String> = hits.iter().map(|h| slash(&h.path)).collect();
    paths.sort();
    paths
}

pub fn slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A small workspace of test cases in English and Chinese
pub fn seed_cases(ws: &Workspace) {
    ws.write(
        "auth/login.md",
        "# Login test case\n\n1. Open the login page\n2. Enter the password\n3. Submit\n",
    );
    ws.write(
        "auth/reset.md",
        "# Password reset\n\nRequest a password reset link and follow it.\n",
    );
    ws.write(
        "cn/登录.md",
        "# 测试用例：登录失败\n\n输入错误密码，检查提示信息。\n",
    );
    ws.write("cn/支付.md", "# 支付测试\n\n使用优惠券支付订单。\n");
    ws.write("notes/readme.txt", "login password reset 测试用例\n");
}
