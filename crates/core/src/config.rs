//! Reader configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReadError, Result};

/// Configuration for a read session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Upper bound on subtasks reconstructed or decoded at the same time.
    pub max_concurrent_subtasks: usize,
    /// Keep going when single subtasks have corrupt state, reporting them
    /// instead of failing the whole read.
    pub allow_partial: bool,
    /// Check that every keyed entry hashes into the key group it is stored
    /// under.
    pub verify_key_groups: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subtasks: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            allow_partial: false,
            verify_key_groups: true,
        }
    }
}

impl ReaderConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ReadError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_max_concurrent_subtasks(mut self, max: usize) -> Self {
        self.max_concurrent_subtasks = max;
        self
    }

    pub fn with_allow_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    /// Worker bound, never below one.
    pub fn worker_bound(&self) -> usize {
        self.max_concurrent_subtasks.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"allow_partial": true}"#).unwrap();
        let config = ReaderConfig::from_json_file(file.path()).unwrap();
        assert!(config.allow_partial);
        assert!(config.verify_key_groups);
        assert!(config.worker_bound() >= 1);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        assert!(matches!(
            ReaderConfig::from_json_file(file.path()),
            Err(ReadError::Config { .. })
        ));
        assert!(matches!(
            ReaderConfig::from_json_file(file.path().with_extension("missing")),
            Err(ReadError::Io { .. })
        ));
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = ReaderConfig::default().with_max_concurrent_subtasks(0);
        assert_eq!(config.worker_bound(), 1);
    }
}
