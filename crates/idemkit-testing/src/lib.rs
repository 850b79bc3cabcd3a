//! Testing infrastructure for the idempotency coordinator.
//!
//! - [`DeterministicKeyValueStore`]: in-memory [`KeyValueStore`](idemkit_kv::KeyValueStore)
//!   with real CAS semantics, revision metadata, ordered prefix scans and
//!   fault injection for simulating a store outage
//! - [`EffectCounter`]: counts how many times a protected side effect ran

mod effect;
mod inmemory;

pub use effect::EffectCounter;
pub use inmemory::DeterministicKeyValueStore;
