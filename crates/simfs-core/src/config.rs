//! Injected configuration.
//!
//! The original keeps the cache root as a process-wide `STORAGEDIR` macro.
//! This port turns it into an explicit value the embedder constructs once
//! (from a config file, environment, or test fixture) and threads through to
//! [`crate::engine::CacheEngine::new`], per SPEC_FULL §1.1.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Process-wide settings for the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimFsConfig {
    /// Root directory under which per-subscriber cache directories
    /// (`<storage_root>/<imsi>-<phase>/`) are created.
    pub storage_root: PathBuf,
}

impl SimFsConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        SimFsConfig {
            storage_root: storage_root.into(),
        }
    }

    /// Load from a JSON config file, e.g. `{"storage_root": "/var/lib/modem/sim"}`.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
