//! Test fixtures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{BuildConfig, RawConfig};

/// A project directory that is removed on drop.
pub struct TempProject {
    _dir: TempDir,
    root: PathBuf,
}

impl TempProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel` inside the project.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write `content` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

/// Validated config for `project` from inline JSON. Mode comes from the
/// JSON (production when absent); no environment is consulted.
pub fn config_from_json(project: &TempProject, json: serde_json::Value) -> BuildConfig {
    let raw: RawConfig = serde_json::from_value(json).unwrap();
    let mode = raw.mode.unwrap_or_default();
    BuildConfig::from_raw(project.root(), raw, mode, &HashMap::new()).unwrap()
}
