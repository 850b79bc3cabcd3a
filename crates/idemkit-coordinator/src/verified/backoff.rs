//! Backoff for callers waiting on an in-progress key.

/// Result of one backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffResult {
    /// Sleep duration in milliseconds (includes jitter).
    pub sleep_ms: u64,
    /// Next backoff value (for exponential increase).
    pub next_backoff_ms: u64,
}

/// Compute exponential backoff with jitter.
///
/// Jitter is additive and bounded by `current_backoff_ms / 2`, so waiters
/// that started together drift apart instead of polling the store in lockstep.
///
/// # Arguments
///
/// * `current_backoff_ms` - Current backoff duration in milliseconds
/// * `max_backoff_ms` - Maximum allowed backoff in milliseconds
/// * `jitter_seed` - Random value for jitter calculation
///
/// # Example
///
/// ```
/// use idemkit_coordinator::verified::compute_backoff_with_jitter;
///
/// let result = compute_backoff_with_jitter(100, 1000, 25);
/// assert_eq!(result.sleep_ms, 125);
/// assert_eq!(result.next_backoff_ms, 200);
/// ```
#[inline]
pub fn compute_backoff_with_jitter(current_backoff_ms: u64, max_backoff_ms: u64, jitter_seed: u64) -> BackoffResult {
    let max_jitter = current_backoff_ms.saturating_div(2).saturating_add(1);
    let jitter = jitter_seed % max_jitter;

    let sleep_ms = current_backoff_ms.saturating_add(jitter);

    let doubled = current_backoff_ms.saturating_mul(2);
    let next_backoff_ms = if doubled < max_backoff_ms {
        doubled
    } else {
        max_backoff_ms
    };

    BackoffResult {
        sleep_ms,
        next_backoff_ms,
    }
}

/// Clamp a backoff sleep to the time left in the wait budget.
///
/// Never returns zero so a waiter always yields to the runtime.
#[inline]
pub fn compute_wait_sleep_ms(sleep_ms: u64, remaining_ms: u64) -> u64 {
    sleep_ms.min(remaining_ms).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let result = compute_backoff_with_jitter(100, 1000, 0);
        assert_eq!(result.sleep_ms, 100);
        assert_eq!(result.next_backoff_ms, 200);
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let result = compute_backoff_with_jitter(800, 1000, 0);
        assert_eq!(result.next_backoff_ms, 1000);
        let result = compute_backoff_with_jitter(1000, 1000, 0);
        assert_eq!(result.next_backoff_ms, 1000);
    }

    #[test]
    fn test_jitter_bounded() {
        // max_jitter = 100 / 2 + 1 = 51, so seed 75 wraps to 24
        let result = compute_backoff_with_jitter(100, 1000, 75);
        assert_eq!(result.sleep_ms, 124);
    }

    #[test]
    fn test_zero_backoff_no_panic() {
        let result = compute_backoff_with_jitter(0, 1000, u64::MAX);
        assert_eq!(result.sleep_ms, 0);
        assert_eq!(result.next_backoff_ms, 0);
    }

    #[test]
    fn test_wait_sleep_clamped() {
        assert_eq!(compute_wait_sleep_ms(500, 120), 120);
        assert_eq!(compute_wait_sleep_ms(50, 120), 50);
        assert_eq!(compute_wait_sleep_ms(50, 0), 1);
    }
}
