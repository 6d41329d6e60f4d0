//! Repository configuration.
//!
//! A [`Config`] names the repository root that all rewrites must stay inside
//! and where its workflow files live. It can be built in code or loaded from a
//! JSON file; every field except `base_dir` has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Repository root. Updates outside of it are rejected.
    pub base_dir: PathBuf,
    /// Workflow directory, relative to `base_dir`.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Use the process-wide file lock table instead of one owned by the manager.
    #[serde(default = "default_shared_locks")]
    pub shared_locks: bool,
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from(".github/workflows")
}

fn default_extensions() -> Vec<String> {
    vec!["yml".to_string(), "yaml".to_string()]
}

fn default_shared_locks() -> bool {
    true
}

impl Config {
    pub fn for_repository(root: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: root.into(),
            workflows_dir: default_workflows_dir(),
            extensions: default_extensions(),
            shared_locks: default_shared_locks(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration JSON")
    }

    /// Loads a JSON config file. A relative `base_dir` is resolved against
    /// the directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_json_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        if config.base_dir.is_relative() {
            let dir = path.parent().unwrap_or(Path::new("."));
            config.base_dir = dir.join(&config.base_dir);
        }
        Ok(config)
    }

    pub fn workflows_path(&self) -> PathBuf {
        self.base_dir.join(&self.workflows_dir)
    }
}
