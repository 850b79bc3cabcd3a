//! Per-call execution options.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::config::ConfigError;
use crate::config::invalid;
use crate::constants::DEFAULT_LEASE_DURATION_MS;
use crate::constants::DEFAULT_MAX_RECLAIM_ATTEMPTS;
use crate::constants::DEFAULT_RETENTION_DURATION_MS;
use crate::constants::DEFAULT_WAIT_INITIAL_BACKOFF_MS;
use crate::constants::DEFAULT_WAIT_MAX_BACKOFF_MS;
use crate::verified;

/// What happens to a key when its operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Store the error; replays return it without re-running the operation.
    #[default]
    CacheFailures,
    /// Release the claim; the next call with the key runs the operation again.
    RetryFailures,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cache_failures" | "cache" => Ok(FailurePolicy::CacheFailures),
            "retry_failures" | "retry" => Ok(FailurePolicy::RetryFailures),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// What a caller does when the key is held by a live claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Return `Conflict` immediately.
    #[default]
    FailFast,
    /// Poll with exponential backoff until the claim resolves or `timeout_ms` passes.
    WaitForCompletion {
        /// Total wait budget.
        timeout_ms: u64,
        /// First backoff between polls.
        initial_backoff_ms: u64,
        /// Backoff ceiling.
        max_backoff_ms: u64,
    },
}

impl ConcurrencyPolicy {
    /// Wait up to `timeout` with the default backoff schedule.
    pub fn wait_for_completion(timeout: Duration) -> Self {
        ConcurrencyPolicy::WaitForCompletion {
            timeout_ms: duration_ms(timeout),
            initial_backoff_ms: DEFAULT_WAIT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_WAIT_MAX_BACKOFF_MS,
        }
    }
}

/// Lease renewal while the operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HeartbeatPolicy {
    /// The lease is never renewed.
    #[default]
    Disabled,
    /// Renew every third of the lease duration.
    Auto,
    /// Renew at a fixed interval.
    Interval {
        /// Time between renewals.
        interval_ms: u64,
    },
}

impl HeartbeatPolicy {
    /// Renewal interval for a lease, or `None` when disabled.
    pub fn interval_ms(&self, lease_ms: u64) -> Option<u64> {
        match self {
            HeartbeatPolicy::Disabled => None,
            HeartbeatPolicy::Auto => Some(verified::compute_heartbeat_interval_ms(lease_ms)),
            HeartbeatPolicy::Interval { interval_ms } => Some(*interval_ms),
        }
    }
}

/// Options for one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// How long a claim is held before others may take it over.
    pub lease_duration_ms: u64,
    /// How long terminal records are replayable.
    pub retention_duration_ms: u64,
    /// What happens on operation failure.
    pub failure_policy: FailurePolicy,
    /// What happens when another caller holds the key.
    pub concurrency_policy: ConcurrencyPolicy,
    /// Reclaim and failure-retry cycles before giving up with `Conflict`.
    pub max_reclaim_attempts: u32,
    /// Lease renewal while the operation runs.
    pub heartbeat: HeartbeatPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            retention_duration_ms: DEFAULT_RETENTION_DURATION_MS,
            failure_policy: FailurePolicy::default(),
            concurrency_policy: ConcurrencyPolicy::default(),
            max_reclaim_attempts: DEFAULT_MAX_RECLAIM_ATTEMPTS,
            heartbeat: HeartbeatPolicy::default(),
        }
    }
}

impl ExecuteOptions {
    /// Reject option combinations that would misbehave at run time.
    ///
    /// `execute` checks this before touching the store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration_ms == 0 {
            return Err(invalid("lease_duration_ms", self.lease_duration_ms, "must be greater than 0"));
        }
        if self.retention_duration_ms == 0 {
            return Err(invalid("retention_duration_ms", self.retention_duration_ms, "must be greater than 0"));
        }
        if let ConcurrencyPolicy::WaitForCompletion {
            timeout_ms,
            initial_backoff_ms,
            max_backoff_ms,
        } = self.concurrency_policy
        {
            if timeout_ms == 0 {
                return Err(invalid("concurrency_policy.timeout_ms", timeout_ms, "must be greater than 0"));
            }
            if initial_backoff_ms == 0 {
                return Err(invalid(
                    "concurrency_policy.initial_backoff_ms",
                    initial_backoff_ms,
                    "must be greater than 0",
                ));
            }
            if max_backoff_ms < initial_backoff_ms {
                return Err(invalid(
                    "concurrency_policy.max_backoff_ms",
                    max_backoff_ms,
                    "must be at least initial_backoff_ms",
                ));
            }
        }
        if let Some(interval_ms) = self.heartbeat.interval_ms(self.lease_duration_ms)
            && !verified::is_heartbeat_interval_safe(interval_ms, self.lease_duration_ms)
        {
            return Err(invalid("heartbeat.interval_ms", interval_ms, "must be non-zero and below half the lease"));
        }
        Ok(())
    }

    /// Set the lease duration.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_duration_ms = duration_ms(lease);
        self
    }

    /// Set the retention duration.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_duration_ms = duration_ms(retention);
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the concurrency policy.
    pub fn with_concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency_policy = policy;
        self
    }

    /// Set the reclaim budget.
    pub fn with_max_reclaim_attempts(mut self, attempts: u32) -> Self {
        self.max_reclaim_attempts = attempts;
        self
    }

    /// Set the heartbeat policy.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatPolicy) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
