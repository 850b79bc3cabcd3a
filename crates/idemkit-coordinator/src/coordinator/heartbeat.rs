//! Lease renewal while an operation runs.

use std::sync::Arc;
use std::time::Duration;

use idemkit_time::TimeProvider;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::StoreError;
use crate::key::IdempotencyKey;
use crate::store::IdempotencyStore;
use crate::verified;

/// Renews an owned lease every `interval_ms` until stopped.
///
/// If a renewal finds the claim gone, the operation's cancellation token is
/// triggered so a cooperative operation can stop early.
///
/// Dropping the handle stops renewals too, so an abandoned `execute` future
/// leaves its claim to expire with the lease.
pub(crate) struct Heartbeat {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub(crate) fn spawn<S>(
        store: Arc<S>,
        clock: Arc<dyn TimeProvider>,
        key: IdempotencyKey,
        owner_token: String,
        lease_ms: u64,
        interval_ms: u64,
        operation_cancel: CancellationToken,
    ) -> Self
    where
        S: IdempotencyStore + ?Sized + 'static,
    {
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();
        let period = Duration::from_millis(interval_ms.max(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_signal.cancelled() => break,
                    _ = ticker.tick() => {
                        let now_ms = clock.now_unix_ms();
                        let new_expires_at_ms = verified::compute_lease_deadline(now_ms, lease_ms);
                        match store.renew_lease(&key, &owner_token, new_expires_at_ms, now_ms).await {
                            Ok(record) => {
                                debug!(key = %key, lease_expires_at_ms = record.lease_expires_at_ms, "heartbeat renewed lease");
                            }
                            Err(StoreError::LeaseLost { .. }) => {
                                warn!(key = %key, owner_token = %owner_token, "heartbeat found claim lost, cancelling operation");
                                operation_cancel.cancel();
                                break;
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "heartbeat renewal failed, retrying next tick");
                            }
                        }
                    }
                }
            }
        });

        Self { stop, task }
    }

    /// Stop renewing and wait for the task to exit.
    pub(crate) async fn stop(mut self) {
        self.stop.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
