//! Record classification and ownership rules.

use crate::record::RecordStatus;
use crate::verified::lease::is_lease_expired;

/// What a caller should do with an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDisposition {
    /// A cached result exists; replay it.
    Completed,
    /// A cached failure exists; replay or retry per failure policy.
    Failed,
    /// Another owner claimed the key.
    InProgress {
        /// False once the owner's lease has lapsed and the key may be reclaimed.
        is_still_leased: bool,
    },
}

/// Classify a record at time `now_ms`.
#[inline]
pub fn classify_record(status: RecordStatus, lease_expires_at_ms: u64, now_ms: u64) -> RecordDisposition {
    match status {
        RecordStatus::Completed => RecordDisposition::Completed,
        RecordStatus::Failed => RecordDisposition::Failed,
        RecordStatus::Claimed => RecordDisposition::InProgress {
            is_still_leased: !is_lease_expired(lease_expires_at_ms, now_ms),
        },
    }
}

/// Only the owner of a `Claimed` record may transition it.
///
/// Lease expiry is not checked: an owner whose lease lapsed but was never
/// reclaimed still holds the key.
#[inline]
pub fn is_owned_claim(status: RecordStatus, record_owner: &str, owner_token: &str) -> bool {
    status == RecordStatus::Claimed && record_owner == owner_token
}

/// Fencing token for a reclaim. Strictly increases; a fresh claim starts at 1.
#[inline]
pub fn compute_next_fencing_token(current: u64) -> u64 {
    current.saturating_add(1).max(1)
}

/// True while a caller still has reclaim attempts left.
#[inline]
pub fn can_attempt_reclaim(attempts_made: u32, max_attempts: u32) -> bool {
    attempts_made < max_attempts
}
