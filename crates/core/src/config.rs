//! # Deploy Configuration
//!
//! Where repositories live and which commands install and build them.
//!
//! Loaded from `.launchpad/config.json` when present, merged over the
//! defaults, with `LAUNCHPAD_REPOS_DIR` taking precedence for the repository
//! root.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the repository root
pub const REPOS_DIR_ENV: &str = "LAUNCHPAD_REPOS_DIR";

/// Default location of the config file, relative to the working directory
pub const CONFIG_PATH: &str = ".launchpad/config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Shared root every repository is cloned into
    pub repos_dir: PathBuf,
    /// Git executable (or a wrapper script)
    pub git_command: String,
    /// Dependency install step, run inside the repository
    pub install_command: String,
    /// Build step, run inside the repository
    pub build_command: String,
    /// Buffered events per subscriber before slow subscribers start lagging
    pub event_capacity: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from("repos"),
            git_command: "git".to_string(),
            install_command: "npm install".to_string(),
            build_command: "npm run build".to_string(),
            event_capacity: 1024,
        }
    }
}

impl DeployConfig {
    /// Load from [`CONFIG_PATH`] and the environment
    pub async fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH)).await
    }

    /// Load from an explicit file; a missing or malformed file yields defaults
    pub async fn load_from(path: &Path) -> Self {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(REPOS_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.repos_dir = PathBuf::from(dir);
            }
        }
    }

    /// Directory a repository with this name is cloned into
    pub fn repo_path(&self, repo_name: &str) -> PathBuf {
        self.repos_dir.join(repo_name)
    }
}
