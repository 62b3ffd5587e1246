//! Runtime configuration for the push pipeline
//!
//! Every field has a default, so a missing or partial config file is valid.
//! The values are policy, not protocol: changing them never affects what a
//! correct cycle delivers, only how quickly and how persistently.

use std::path::Path;
use std::time::Duration;

use devpush_fs::{ConfigStore, NormalizedPath, WorkspacePath};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Randomization factor in `[0, 1)` applied to every backoff interval
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Configuration for one component's push pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period the watcher waits for before triggering a cycle
    pub debounce_ms: u64,
    /// Deadline applied to every individual remote call
    pub call_timeout_secs: u64,
    /// Size of the pool that loads file contents for the archive
    pub transfer_workers: usize,
    /// Ignore patterns added on top of the ignore file
    pub ignore: Vec<String>,
    /// Run the component's build command after files change
    pub run_build_command: bool,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            call_timeout_secs: 30,
            transfer_workers: 4,
            ignore: Vec::new(),
            run_build_command: true,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load `.devpush/config.{toml,json,yaml}` under `root`, or defaults if
    /// no config file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let stem = NormalizedPath::new(root.join(WorkspacePath::DevpushDir).join("config"));
        let config = ConfigStore::new().load_first::<Self>(&stem)?.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        if self.transfer_workers == 0 {
            return Err(Error::Config {
                message: "transfer_workers must be at least 1".into(),
            });
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::Config {
                message: format!("retry.jitter must be in [0, 1), got {}", self.retry.jitter),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config {
                message: format!("retry.multiplier must be >= 1, got {}", self.retry.multiplier),
            });
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig::load(temp.path()).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".devpush");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            "debounce_ms = 50\nignore = [\"dist/\"]\n\n[retry]\nmax_attempts = 2\n",
        )
        .unwrap();

        let config = SyncConfig::load(temp.path()).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.ignore, vec!["dist/".to_string()]);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert_eq!(config.transfer_workers, 4);
    }

    #[test]
    fn yaml_config_is_accepted() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".devpush");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.yaml"), "transfer_workers: 8\n").unwrap();

        let config = SyncConfig::load(temp.path()).unwrap();
        assert_eq!(config.transfer_workers, 8);
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = SyncConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        let mut config = SyncConfig::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());
    }
}
