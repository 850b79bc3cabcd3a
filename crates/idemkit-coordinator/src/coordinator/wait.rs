//! Waiting out another caller's live claim.

use std::time::Duration;

use tokio::time::Instant;

use crate::verified;

/// Wait budget and backoff state for one `execute` call.
///
/// Measured on the runtime clock, not the record clock, so a simulated record
/// clock cannot stretch or shrink how long a caller blocks.
#[derive(Debug)]
pub(crate) struct WaitBudget {
    started: Instant,
    deadline: Instant,
    backoff_ms: u64,
    max_backoff_ms: u64,
}

impl WaitBudget {
    pub(crate) fn new(timeout_ms: u64, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + Duration::from_millis(timeout_ms),
            backoff_ms: initial_backoff_ms,
            max_backoff_ms,
        }
    }

    pub(crate) fn waited_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Next sleep, or `None` once the budget is spent.
    pub(crate) fn next_sleep(&mut self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.deadline {
            return None;
        }
        let remaining_ms = u64::try_from((self.deadline - now).as_millis()).unwrap_or(u64::MAX);
        let backoff = verified::compute_backoff_with_jitter(self.backoff_ms, self.max_backoff_ms, rand::random::<u64>());
        self.backoff_ms = backoff.next_backoff_ms;
        Some(Duration::from_millis(verified::compute_wait_sleep_ms(backoff.sleep_ms, remaining_ms)))
    }
}
