//! Lease and retention timing.
//!
//! All timestamps are Unix milliseconds.

/// Compute when a lease granted at `now_ms` expires.
#[inline]
pub fn compute_lease_deadline(now_ms: u64, lease_ms: u64) -> u64 {
    now_ms.saturating_add(lease_ms)
}

/// Check if a lease has expired.
///
/// At exactly the deadline the lease is still held.
#[inline]
pub fn is_lease_expired(lease_expires_at_ms: u64, now_ms: u64) -> bool {
    now_ms > lease_expires_at_ms
}

/// Compute the new lease deadline for a renewal.
///
/// A renewal never shortens a lease.
#[inline]
pub fn compute_renewed_deadline(current_expires_at_ms: u64, requested_expires_at_ms: u64) -> u64 {
    current_expires_at_ms.max(requested_expires_at_ms)
}

/// Compute when a terminal record may be deleted.
///
/// The result is strictly greater than `completed_at_ms` even for a zero
/// retention, so a record is always replayable at the instant it completes.
#[inline]
pub fn compute_retention_deadline(completed_at_ms: u64, retention_ms: u64) -> u64 {
    completed_at_ms.saturating_add(retention_ms.max(1))
}

/// Check if a terminal record's retention window has passed.
#[inline]
pub fn is_retention_expired(retention_expires_at_ms: u64, now_ms: u64) -> bool {
    now_ms > retention_expires_at_ms
}

/// Default heartbeat interval: a third of the lease, so two renewals can be
/// missed before the lease lapses.
#[inline]
pub fn compute_heartbeat_interval_ms(lease_ms: u64) -> u64 {
    (lease_ms / 3).max(1)
}

/// A heartbeat interval must be non-zero and below half the lease.
#[inline]
pub fn is_heartbeat_interval_safe(interval_ms: u64, lease_ms: u64) -> bool {
    interval_ms > 0 && interval_ms.saturating_mul(2) < lease_ms
}

/// Default reaper interval: half the lease duration.
#[inline]
pub fn compute_reaper_interval_ms(lease_ms: u64) -> u64 {
    (lease_ms / 2).max(1)
}
