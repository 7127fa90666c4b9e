//! Collaboration settings.

use crate::crdt::MergeLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing and capacity settings for a collaboration session.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// How often presence and the version vector are re-broadcast.
    pub heartbeat_interval_ms: u64,
    /// Presence not refreshed within this window is purged.
    pub presence_timeout_ms: u64,
    /// A broadcast session with no reply to its sync request counts as
    /// synced after this long.
    pub sync_timeout_ms: u64,
    pub pending_window_ms: u64,
    pub max_pending_ops: usize,
    pub relay_url: String,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            presence_timeout_ms: 15_000,
            sync_timeout_ms: 2_000,
            pending_window_ms: 30_000,
            max_pending_ops: 1024,
            relay_url: "ws://localhost:3030/ws".to_string(),
        }
    }
}

impl CollabConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file. A missing file yields `None`.
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            config_path: config_path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map(Some)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn merge_limits(&self) -> MergeLimits {
        MergeLimits {
            pending_window: Duration::from_millis(self.pending_window_ms),
            max_pending: self.max_pending_ops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CollabConfig::from_json(r#"{"heartbeat_interval_ms": 1000}"#).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.presence_timeout_ms, 15_000);
        assert_eq!(config.relay_url, "ws://localhost:3030/ws");
    }

    #[test]
    fn test_merge_limits() {
        let config = CollabConfig {
            pending_window_ms: 500,
            max_pending_ops: 8,
            ..CollabConfig::default()
        };
        let limits = config.merge_limits();
        assert_eq!(limits.pending_window, Duration::from_millis(500));
        assert_eq!(limits.max_pending, 8);
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collab.json");
        assert!(CollabConfig::load_from_path(&path).unwrap().is_none());

        std::fs::write(&path, r#"{"relay_url": "ws://relay.example:9000/ws"}"#).unwrap();
        let config = CollabConfig::load_from_path(&path).unwrap().unwrap();
        assert_eq!(config.relay_url, "ws://relay.example:9000/ws");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CollabConfig::load_from_path(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
