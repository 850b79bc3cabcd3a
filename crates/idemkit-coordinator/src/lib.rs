//! Idempotent operation coordinator.
//!
//! Guarantees that an operation tagged with an idempotency key runs at most
//! once across retries, concurrent callers and crashed processes, and that
//! every later call with the same key receives the recorded outcome.
//!
//! # Architecture
//!
//! ```text
//! Coordinator ──► IdempotencyStore ──► KeyValueStore (CAS)
//!      │               ▲
//!      │               └── LeaseReaper (background GC)
//!      └── ResultCodec (payload encoding)
//! ```
//!
//! Decisions about leases, ownership and backoff live in [`verified`] as pure
//! functions; the modules around it do the I/O.
//!
//! # Example
//!
//! ```ignore
//! let kv = DeterministicKeyValueStore::new();
//! let store = Arc::new(KvIdempotencyStore::new(kv));
//! let coordinator = Coordinator::new(store);
//!
//! let key = IdempotencyKey::new("payments", request.idempotency_key)?;
//! let receipt = coordinator
//!     .execute(&key, &ExecuteOptions::default(), || charge_card(&request))
//!     .await?;
//! ```

pub mod codec;
pub mod config;
pub mod constants;
mod coordinator;
pub mod error;
pub mod key;
pub mod policy;
pub mod reaper;
pub mod record;
pub mod store;
pub mod verified;

pub use codec::JsonCodec;
pub use codec::ResultCodec;
pub use config::ConfigError;
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::CodecError;
pub use error::CoordinatorError;
pub use error::KeyError;
pub use error::StoreError;
pub use key::IdempotencyKey;
pub use policy::ConcurrencyPolicy;
pub use policy::ExecuteOptions;
pub use policy::FailurePolicy;
pub use policy::HeartbeatPolicy;
pub use reaper::LeaseReaper;
pub use reaper::ReapStats;
pub use reaper::ReaperConfig;
pub use record::IdempotencyRecord;
pub use record::RecordStatus;
pub use store::ClaimOutcome;
pub use store::IdempotencyStore;
pub use store::KvIdempotencyStore;
