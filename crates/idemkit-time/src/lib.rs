//! Time utilities for lease and retention deadlines.
//!
//! Leases, retention windows and reaper sweeps are all expressed as Unix
//! millisecond deadlines. The [`TimeProvider`] trait lets the coordinator read
//! the clock through an injected handle so tests can move time forward
//! explicitly instead of sleeping through a lease.
//!
//! A clock set before the Unix epoch reads as 0; it never panics.

#[cfg(feature = "simulation")]
use std::sync::Arc;
#[cfg(feature = "simulation")]
use std::sync::atomic::AtomicU64;
#[cfg(feature = "simulation")]
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall-clock Unix milliseconds.
///
/// Returns 0 if system time is before UNIX epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Trait for injectable time sources.
///
/// Use [`SystemTimeProvider`] in production and `SimulatedTimeProvider`
/// (behind the `simulation` feature) in tests.
///
/// # Example
///
/// ```
/// use idemkit_time::{TimeProvider, SystemTimeProvider};
///
/// fn lease_is_live<T: TimeProvider>(time: &T, lease_expires_at_ms: u64) -> bool {
///     time.now_unix_ms() <= lease_expires_at_ms
/// }
///
/// let time = SystemTimeProvider;
/// assert!(lease_is_live(&time, idemkit_time::current_time_ms() + 1000));
/// ```
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current Unix time in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

/// Production time provider using the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Manually driven clock for lease-expiry tests.
///
/// Clones share the same underlying clock, so a test can hand one clone to
/// the coordinator and step past a lease deadline through another.
#[cfg(feature = "simulation")]
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    current_time_ms: Arc<AtomicU64>,
}

#[cfg(feature = "simulation")]
impl SimulatedTimeProvider {
    /// Clock frozen at `initial_time_ms` until moved.
    pub fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    /// Step forward `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, delta_secs: u64) {
        self.advance_ms(delta_secs.saturating_mul(1000));
    }

    /// Jump to an absolute time, possibly backwards.
    pub fn set_ms(&self, time_ms: u64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

#[cfg(feature = "simulation")]
impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}
