//! Coordinator configuration.
//!
//! Layered like the rest of the stack:
//! 1. Hardcoded defaults
//! 2. TOML file, if given and present
//! 3. `IDEMKIT_*` environment variables (always win)
//!
//! | Variable | Field |
//! |----------|-------|
//! | `IDEMKIT_LEASE_DURATION_MS` | `lease_duration_ms` |
//! | `IDEMKIT_RETENTION_DURATION_MS` | `retention_duration_ms` |
//! | `IDEMKIT_FAILURE_POLICY` | `failure_policy` (`cache_failures` / `retry_failures`) |
//! | `IDEMKIT_REAPER_INTERVAL_MS` | `reaper_interval_ms` |
//! | `IDEMKIT_MAX_RECLAIM_ATTEMPTS` | `max_reclaim_attempts` |
//! | `IDEMKIT_WAIT_TIMEOUT_MS` | `concurrency_policy` (0 = fail fast) |

mod error;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use error::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_LEASE_DURATION_MS;
use crate::constants::DEFAULT_MAX_RECLAIM_ATTEMPTS;
use crate::constants::DEFAULT_REAPER_BATCH_SIZE;
use crate::constants::DEFAULT_REAPER_MAX_BATCHES;
use crate::constants::DEFAULT_RETENTION_DURATION_MS;
use crate::constants::DEFAULT_WAIT_INITIAL_BACKOFF_MS;
use crate::constants::DEFAULT_WAIT_MAX_BACKOFF_MS;
use crate::policy::ConcurrencyPolicy;
use crate::policy::ExecuteOptions;
use crate::policy::FailurePolicy;
use crate::policy::HeartbeatPolicy;
use crate::reaper::ReaperConfig;
use crate::verified;

/// Coordinator and reaper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Lease duration in milliseconds.
    pub lease_duration_ms: u64,
    /// Retention for terminal records in milliseconds.
    pub retention_duration_ms: u64,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
    /// Behavior when another caller holds the key.
    pub concurrency_policy: ConcurrencyPolicy,
    /// Reclaim and failure-retry cycles per call.
    pub max_reclaim_attempts: u32,
    /// Lease renewal while an operation runs.
    pub heartbeat: HeartbeatPolicy,
    /// Reaper interval. Defaults to half the lease duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaper_interval_ms: Option<u64>,
    /// Records the reaper deletes per batch.
    pub reaper_batch_size: u32,
    /// Batches per reaper run.
    pub reaper_max_batches: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            retention_duration_ms: DEFAULT_RETENTION_DURATION_MS,
            failure_policy: FailurePolicy::default(),
            concurrency_policy: ConcurrencyPolicy::default(),
            max_reclaim_attempts: DEFAULT_MAX_RECLAIM_ATTEMPTS,
            heartbeat: HeartbeatPolicy::default(),
            reaper_interval_ms: None,
            reaper_batch_size: DEFAULT_REAPER_BATCH_SIZE,
            reaper_max_batches: DEFAULT_REAPER_MAX_BATCHES,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::File {
            path: path.as_ref().display().to_string(),
            reason: format!("Failed to read file: {}", e),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::File {
            path: path.as_ref().display().to_string(),
            reason: format!("Failed to parse TOML: {}", e),
        })
    }

    /// Load configuration with layered approach:
    /// 1. Start with defaults
    /// 2. Load from TOML file if given and it exists
    /// 3. Override with environment variables
    /// 4. Validate
    pub fn load_with_layers(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                tracing::info!("Loading idempotency configuration from: {}", path.display());
                Self::from_toml_file(path)?
            }
            Some(path) => {
                tracing::warn!("Idempotency config file not found, using defaults: {}", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IDEMKIT_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("IDEMKIT_LEASE_DURATION_MS") {
            self.lease_duration_ms = parse_env("IDEMKIT_LEASE_DURATION_MS", &value)?;
        }
        if let Some(value) = lookup("IDEMKIT_RETENTION_DURATION_MS") {
            self.retention_duration_ms = parse_env("IDEMKIT_RETENTION_DURATION_MS", &value)?;
        }
        if let Some(value) = lookup("IDEMKIT_FAILURE_POLICY") {
            self.failure_policy = parse_env("IDEMKIT_FAILURE_POLICY", &value)?;
        }
        if let Some(value) = lookup("IDEMKIT_REAPER_INTERVAL_MS") {
            self.reaper_interval_ms = Some(parse_env("IDEMKIT_REAPER_INTERVAL_MS", &value)?);
        }
        if let Some(value) = lookup("IDEMKIT_MAX_RECLAIM_ATTEMPTS") {
            self.max_reclaim_attempts = parse_env("IDEMKIT_MAX_RECLAIM_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("IDEMKIT_WAIT_TIMEOUT_MS") {
            let timeout_ms: u64 = parse_env("IDEMKIT_WAIT_TIMEOUT_MS", &value)?;
            self.concurrency_policy = match (timeout_ms, self.concurrency_policy) {
                (0, _) => ConcurrencyPolicy::FailFast,
                (
                    _,
                    ConcurrencyPolicy::WaitForCompletion {
                        initial_backoff_ms,
                        max_backoff_ms,
                        ..
                    },
                ) => ConcurrencyPolicy::WaitForCompletion {
                    timeout_ms,
                    initial_backoff_ms,
                    max_backoff_ms,
                },
                (_, ConcurrencyPolicy::FailFast) => ConcurrencyPolicy::WaitForCompletion {
                    timeout_ms,
                    initial_backoff_ms: DEFAULT_WAIT_INITIAL_BACKOFF_MS,
                    max_backoff_ms: DEFAULT_WAIT_MAX_BACKOFF_MS,
                },
            };
        }
        Ok(())
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execute_options().validate()?;
        if self.reaper_batch_size == 0 {
            return Err(invalid("reaper_batch_size", self.reaper_batch_size, "must be greater than 0"));
        }
        if self.reaper_max_batches == 0 {
            return Err(invalid("reaper_max_batches", self.reaper_max_batches, "must be greater than 0"));
        }
        if self.reaper_interval_ms == Some(0) {
            return Err(invalid("reaper_interval_ms", 0, "must be greater than 0"));
        }
        Ok(())
    }

    /// Per-call options derived from this configuration.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            lease_duration_ms: self.lease_duration_ms,
            retention_duration_ms: self.retention_duration_ms,
            failure_policy: self.failure_policy,
            concurrency_policy: self.concurrency_policy,
            max_reclaim_attempts: self.max_reclaim_attempts,
            heartbeat: self.heartbeat,
        }
    }

    /// Reaper settings derived from this configuration.
    pub fn reaper_config(&self) -> ReaperConfig {
        let interval_ms = self
            .reaper_interval_ms
            .unwrap_or_else(|| verified::compute_reaper_interval_ms(self.lease_duration_ms));
        ReaperConfig {
            interval: Duration::from_millis(interval_ms),
            batch_size: self.reaper_batch_size,
            max_batches_per_run: self.reaper_max_batches,
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::File {
            path: path.as_ref().display().to_string(),
            reason: format!("Failed to serialize config: {}", e),
        })?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::File {
            path: path.as_ref().display().to_string(),
            reason: format!("Failed to write file: {}", e),
        })
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
