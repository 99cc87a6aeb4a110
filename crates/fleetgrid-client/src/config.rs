//! Console configuration, loaded from RON.
//!
//! ```ron
//! (
//!     api_base: "https://fleet.example/app",
//!     block_size: 100,
//!     coalesce_window_ms: 250,
//! )
//! ```
//!
//! Every field is optional; missing ones take the values in [`crate::constants`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// HTTP base of the REST API; the push URL is derived from it.
    pub api_base: String,
    pub block_size: u64,
    pub max_blocks: usize,
    pub request_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub coalesce_window_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base: constants::DEFAULT_API_BASE.to_string(),
            block_size: constants::DEFAULT_BLOCK_SIZE,
            max_blocks: constants::DEFAULT_MAX_BLOCKS,
            request_timeout_ms: constants::REQUEST_TIMEOUT.as_millis() as u64,
            backoff_initial_ms: constants::PUSH_BACKOFF_INITIAL.as_millis() as u64,
            backoff_max_ms: constants::PUSH_BACKOFF_MAX.as_millis() as u64,
            coalesce_window_ms: constants::PUSH_COALESCE_WINDOW.as_millis() as u64,
        }
    }
}

impl ConsoleConfig {
    /// `$XDG_CONFIG_HOME/fleetgrid/console.ron` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fleetgrid").join("console.ron"))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be at least 1".into()));
        }
        if self.max_blocks == 0 {
            return Err(ConfigError::Invalid("max_blocks must be at least 1".into()));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff range {}..{} ms is empty",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = ConsoleConfig::from_ron(r#"(api_base: "https://fleet.example", block_size: 100)"#)
            .expect("parse");
        assert_eq!(config.api_base, "https://fleet.example");
        assert_eq!(config.block_size, 100);
        assert_eq!(config.max_blocks, constants::DEFAULT_MAX_BLOCKS);
        assert_eq!(config.backoff_initial(), Duration::from_millis(1000));
        assert_eq!(config.backoff_max(), Duration::from_millis(10_000));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let err = ConsoleConfig::from_ron("(block_size: 0)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let err = ConsoleConfig::from_ron("(backoff_initial_ms: 5000, backoff_max_ms: 1000)")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join("fleetgrid-does-not-exist").join("console.ron");
        assert_eq!(ConsoleConfig::load(&path).unwrap(), ConsoleConfig::default());
    }
}
