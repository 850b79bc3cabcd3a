//! Shared harness for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use idemkit_coordinator::Coordinator;
use idemkit_coordinator::IdempotencyKey;
use idemkit_coordinator::KvIdempotencyStore;
use idemkit_testing::DeterministicKeyValueStore;
use idemkit_time::SimulatedTimeProvider;
use tracing_subscriber::EnvFilter;

pub type TestStore = KvIdempotencyStore<DeterministicKeyValueStore>;
pub type TestCoordinator = Coordinator<TestStore>;

/// Start of simulated time for every test.
pub const START_MS: u64 = 1_700_000_000_000;

pub struct Harness {
    pub coordinator: TestCoordinator,
    pub kv: Arc<DeterministicKeyValueStore>,
    pub store: Arc<TestStore>,
    pub clock: SimulatedTimeProvider,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn harness() -> Harness {
    init_tracing();
    let kv = DeterministicKeyValueStore::new();
    let store = Arc::new(KvIdempotencyStore::new(Arc::clone(&kv)));
    let clock = SimulatedTimeProvider::new(START_MS);
    let coordinator = Coordinator::with_clock(Arc::clone(&store), Arc::new(clock.clone()));
    Harness {
        coordinator,
        kv,
        store,
        clock,
    }
}

pub fn key(scope: &str, token: &str) -> IdempotencyKey {
    IdempotencyKey::new(scope, token).expect("valid key")
}
