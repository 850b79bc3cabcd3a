//! Coordinator defaults and limits.

use idemkit_kv::MAX_KEY_SIZE;

/// Prefix for every idempotency record in the key-value store.
pub const RECORD_KEY_PREFIX: &str = "idem/";

/// Maximum size of `scope\0token` in bytes.
///
/// Leaves room for [`RECORD_KEY_PREFIX`] under the store's key limit.
pub const MAX_COMPOSITE_KEY_SIZE: u32 = MAX_KEY_SIZE - RECORD_KEY_PREFIX.len() as u32;

/// Default lease duration (30 seconds).
pub const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;

/// Default retention for terminal records (24 hours).
pub const DEFAULT_RETENTION_DURATION_MS: u64 = 86_400_000;

/// Default number of reclaim/retry cycles per execute call.
pub const DEFAULT_MAX_RECLAIM_ATTEMPTS: u32 = 3;

/// Default first backoff for callers waiting on an in-progress key.
pub const DEFAULT_WAIT_INITIAL_BACKOFF_MS: u64 = 25;

/// Default backoff ceiling for waiting callers.
pub const DEFAULT_WAIT_MAX_BACKOFF_MS: u64 = 1_000;

/// Default number of records the reaper deletes per batch.
pub const DEFAULT_REAPER_BATCH_SIZE: u32 = 100;

/// Default number of batches the reaper runs per sweep.
pub const DEFAULT_REAPER_MAX_BATCHES: u32 = 10;

/// CAS attempts before a store operation reports contention.
pub const MAX_CAS_RETRIES: u32 = 16;
