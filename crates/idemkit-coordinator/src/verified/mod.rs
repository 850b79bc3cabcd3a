//! Pure functions behind the coordinator's lease and claim decisions.
//!
//! Everything here is deterministic: no I/O, no system calls, time passed as
//! an explicit parameter. The imperative shell (store, coordinator, reaper)
//! reads the clock and the store, then asks these functions what to do.
//!
//! # Module Organization
//!
//! - [`key`]: Composite storage key encoding and validation
//! - [`lease`]: Lease, retention and heartbeat timing
//! - [`claim`]: Record classification, ownership and fencing
//! - [`backoff`]: Exponential backoff with jitter for waiters
//!
//! # Tiger Style
//!
//! - Saturating arithmetic (no panics)
//! - Explicit integer widths

pub mod backoff;
pub mod claim;
pub mod key;
pub mod lease;

pub use backoff::BackoffResult;
pub use backoff::compute_backoff_with_jitter;
pub use backoff::compute_wait_sleep_ms;
pub use claim::RecordDisposition;
pub use claim::can_attempt_reclaim;
pub use claim::classify_record;
pub use claim::compute_next_fencing_token;
pub use claim::is_owned_claim;
pub use key::KEY_SEPARATOR;
pub use key::composite_key;
pub use key::is_blank;
pub use key::split_composite_key;
pub use key::storage_key;
pub use lease::compute_heartbeat_interval_ms;
pub use lease::compute_lease_deadline;
pub use lease::compute_reaper_interval_ms;
pub use lease::compute_renewed_deadline;
pub use lease::compute_retention_deadline;
pub use lease::is_heartbeat_interval_safe;
pub use lease::is_lease_expired;
pub use lease::is_retention_expired;
