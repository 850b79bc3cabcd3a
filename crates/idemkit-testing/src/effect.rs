//! Observable side effects for exactly-once assertions.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Shared counter standing in for an external side effect.
///
/// Clones share the count, so one clone can be moved into each operation
/// closure and the test asserts on the original.
#[derive(Debug, Clone, Default)]
pub struct EffectCounter {
    count: Arc<AtomicU32>,
}

impl EffectCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Perform the effect once. Returns the count including this call.
    pub fn record(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Number of times the effect has run.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}
