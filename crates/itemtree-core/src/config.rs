//! Configuration - コアが読む設定
//!
//! 全フィールドに `#[serde(default)]` が付いているので、TOML は必要な値だけ書けばよい。
//!
//! ```toml
//! [watchdog]
//! poll_interval_secs = 30
//! state_timeout_secs = 600
//!
//! [expansion]
//! worker_pool_size = 4
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub watchdog: WatchdogConfig,
    pub expansion: ExpansionConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_secs: u64,
    pub state_timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            state_timeout_secs: 3600,
            batch_size: 20,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn state_timeout(&self) -> chrono::Duration {
        secs_to_chrono(self.state_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub worker_pool_size: usize,
    pub max_tree_depth: u32,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            max_tree_depth: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub completed_ttl_secs: u64,
    pub failed_ttl_secs: u64,
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            completed_ttl_secs: 3600,
            failed_ttl_secs: 86_400,
            batch_size: 100,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn completed_ttl(&self) -> chrono::Duration {
        secs_to_chrono(self.completed_ttl_secs)
    }

    pub fn failed_ttl(&self) -> chrono::Duration {
        secs_to_chrono(self.failed_ttl_secs)
    }
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn positive<T: PartialOrd + Default>(field: &'static str, value: T) -> Result<(), ConfigError> {
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        })
    }
}

impl CoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// 起動時に不正な値を弾く（Fail-fast）
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("watchdog.poll_interval_secs", self.watchdog.poll_interval_secs)?;
        positive("watchdog.state_timeout_secs", self.watchdog.state_timeout_secs)?;
        positive("watchdog.batch_size", self.watchdog.batch_size)?;
        positive("expansion.worker_pool_size", self.expansion.worker_pool_size)?;
        positive("expansion.max_tree_depth", self.expansion.max_tree_depth)?;
        positive("retry.max_attempts", self.retry.max_attempts)?;
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 0.0) {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: format!("must be a positive number, got {}", self.retry.multiplier),
            });
        }
        positive("store.lock_timeout_ms", self.store.lock_timeout_ms)?;
        positive("cleanup.interval_secs", self.cleanup.interval_secs)?;
        positive("cleanup.batch_size", self.cleanup.batch_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.watchdog.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.watchdog.state_timeout(), chrono::Duration::seconds(3600));
        assert_eq!(config.expansion.worker_pool_size, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.store.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.cleanup.failed_ttl(), chrono::Duration::days(1));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [watchdog]
            state_timeout_secs = 120

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.watchdog.state_timeout_secs, 120);
        assert_eq!(config.watchdog.batch_size, 20);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[rstest]
    #[case("[watchdog]\nbatch_size = 0", "watchdog.batch_size")]
    #[case("[expansion]\nworker_pool_size = 0", "expansion.worker_pool_size")]
    #[case("[expansion]\nmax_tree_depth = 0", "expansion.max_tree_depth")]
    #[case("[retry]\nmax_attempts = 0", "retry.max_attempts")]
    #[case("[retry]\nmultiplier = -1.0", "retry.multiplier")]
    #[case("[cleanup]\ninterval_secs = 0", "cleanup.interval_secs")]
    fn rejects_invalid_values(#[case] raw: &str, #[case] expected_field: &str) {
        match CoreConfig::from_toml_str(raw) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected invalid {expected_field}, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            CoreConfig::from_toml_str("[watchdog"),
            Err(ConfigError::Parse(_))
        ));
    }
}
