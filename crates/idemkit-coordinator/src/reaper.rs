//! Background reaper for lapsed claims and expired records.
//!
//! The coordinator never needs the reaper for correctness: an expired claim is
//! reclaimed inline by the next caller. The reaper only bounds storage growth
//! by deleting:
//!
//! 1. `Claimed` records whose lease lapsed (crashed owners)
//! 2. `Completed` / `Failed` records whose retention lapsed
//!
//! Deletes are compare-and-delete against the scanned bytes, so a record
//! rewritten after the scan (reclaimed, completed) is left alone.
//!
//! # Tiger Style
//!
//! - Fixed batch size prevents unbounded work per iteration
//! - Max batches per run prevents starvation of other operations
//! - Uses CancellationToken for graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use idemkit_time::TimeProvider;
use tokio::time::MissedTickBehavior;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::DEFAULT_LEASE_DURATION_MS;
use crate::constants::DEFAULT_REAPER_BATCH_SIZE;
use crate::constants::DEFAULT_REAPER_MAX_BATCHES;
use crate::error::StoreError;
use crate::store::IdempotencyStore;
use crate::verified;

/// Configuration for the reaper task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Interval between runs (default: half the default lease).
    pub interval: Duration,
    /// Maximum records to delete per batch (default: 100).
    pub batch_size: u32,
    /// Maximum batches per sweep (default: 10).
    pub max_batches_per_run: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self::for_lease_duration(DEFAULT_LEASE_DURATION_MS)
    }
}

impl ReaperConfig {
    /// Default settings with the interval set to half of `lease_ms`.
    pub fn for_lease_duration(lease_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(verified::compute_reaper_interval_ms(lease_ms)),
            batch_size: DEFAULT_REAPER_BATCH_SIZE,
            max_batches_per_run: DEFAULT_REAPER_MAX_BATCHES,
        }
    }
}

/// What one reaper run deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// `Claimed` records with lapsed leases.
    pub expired_leases: u32,
    /// Terminal records with lapsed retention.
    pub expired_records: u32,
    /// Batches executed across both sweeps.
    pub batches_run: u32,
}

impl ReapStats {
    /// Total records deleted.
    pub fn total(&self) -> u32 {
        self.expired_leases.saturating_add(self.expired_records)
    }
}

#[derive(Debug, Clone, Copy)]
enum SweepKind {
    ExpiredLeases,
    ExpiredRecords,
}

/// Periodically deletes lapsed claims and expired records.
pub struct LeaseReaper<S: IdempotencyStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn TimeProvider>,
    config: ReaperConfig,
}

impl<S: IdempotencyStore + ?Sized + 'static> LeaseReaper<S> {
    /// Create a reaper over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, config: ReaperConfig) -> Self {
        Self { store, clock, config }
    }

    /// The reaper's configuration.
    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Run both sweeps once at the current time.
    ///
    /// Stops at the first store error; deletions made before it stand.
    pub async fn run_once(&self) -> Result<ReapStats, StoreError> {
        let now_ms = self.clock.now_unix_ms();
        let mut stats = ReapStats::default();

        let (deleted, batches) = self.sweep(SweepKind::ExpiredLeases, now_ms).await?;
        stats.expired_leases = deleted;
        stats.batches_run = batches;

        let (deleted, batches) = self.sweep(SweepKind::ExpiredRecords, now_ms).await?;
        stats.expired_records = deleted;
        stats.batches_run = stats.batches_run.saturating_add(batches);

        if stats.total() > 0 {
            info!(
                expired_leases = stats.expired_leases,
                expired_records = stats.expired_records,
                batches_run = stats.batches_run,
                "Idempotency reaper iteration completed"
            );
        } else {
            debug!("Idempotency reaper: nothing to delete");
        }
        Ok(stats)
    }

    async fn sweep(&self, kind: SweepKind, now_ms: u64) -> Result<(u32, u32), StoreError> {
        let mut total_deleted: u32 = 0;
        let mut batches_run: u32 = 0;

        loop {
            if batches_run >= self.config.max_batches_per_run {
                debug!(
                    total_deleted,
                    batches_run,
                    max_batches = self.config.max_batches_per_run,
                    sweep = ?kind,
                    "Idempotency reaper reached max batches limit"
                );
                break;
            }

            let deleted = match kind {
                SweepKind::ExpiredLeases => self.store.delete_expired_leases(now_ms, self.config.batch_size).await?,
                SweepKind::ExpiredRecords => {
                    self.store.delete_expired_completed(now_ms, self.config.batch_size).await?
                }
            };
            total_deleted = total_deleted.saturating_add(deleted);
            batches_run = batches_run.saturating_add(1);

            if deleted < self.config.batch_size {
                break;
            }
        }

        Ok((total_deleted, batches_run))
    }

    /// Start the reaper on the current tokio runtime.
    ///
    /// Returns a CancellationToken that stops the task.
    pub fn spawn(self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            self.run_loop(cancel_clone).await;
        });

        cancel
    }

    async fn run_loop(self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_batches = self.config.max_batches_per_run,
            "Idempotency reaper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Idempotency reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Idempotency reaper iteration failed");
                    }
                }
            }
        }
    }
}
