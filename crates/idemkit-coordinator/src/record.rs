//! The persisted idempotency record.
//!
//! Records are stored as JSON. Lifecycle:
//!
//! ```text
//!            complete
//!   Claimed ─────────► Completed ──(retention)──► deleted
//!      │  ▲
//!      │  │ reclaim (lease expired, fencing_token + 1)
//!      │  └──
//!      │     fail
//!      ├────────────► Failed ──(retention or retry)──► deleted
//!      │     release / lease reaped
//!      └────────────► deleted
//! ```

use serde::Deserialize;
use serde::Serialize;

use crate::error::KeyError;
use crate::key::IdempotencyKey;
use crate::verified;
use crate::verified::RecordDisposition;

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// An owner holds a lease and is running the operation.
    Claimed,
    /// The operation succeeded and its result is cached.
    Completed,
    /// The operation failed and its error is cached.
    Failed,
}

/// State of one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Key namespace.
    pub scope: String,
    /// Caller-supplied token.
    pub token: String,
    /// Lifecycle state.
    pub status: RecordStatus,
    /// Token of the caller that claimed (or last reclaimed) the key.
    pub owner_token: String,
    /// Lease deadline (Unix ms). Meaningful while `Claimed`.
    pub lease_expires_at_ms: u64,
    /// When the key was first claimed (Unix ms).
    pub created_at_ms: u64,
    /// When the record reached a terminal state (Unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// When a terminal record becomes deletable (Unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_expires_at_ms: Option<u64>,
    /// Encoded result. Present iff `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<String>,
    /// Encoded error. Present iff `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_payload: Option<String>,
    /// Incremented on every reclaim; 1 on the first claim.
    pub fencing_token: u64,
}

impl IdempotencyRecord {
    /// A fresh claim.
    pub fn claimed(key: &IdempotencyKey, owner_token: &str, lease_ms: u64, now_ms: u64) -> Self {
        Self {
            scope: key.scope().to_string(),
            token: key.token().to_string(),
            status: RecordStatus::Claimed,
            owner_token: owner_token.to_string(),
            lease_expires_at_ms: verified::compute_lease_deadline(now_ms, lease_ms),
            created_at_ms: now_ms,
            completed_at_ms: None,
            retention_expires_at_ms: None,
            result_payload: None,
            error_payload: None,
            fencing_token: 1,
        }
    }

    /// Take over this claim for a new owner.
    pub fn reclaimed(&self, owner_token: &str, lease_ms: u64, now_ms: u64) -> Self {
        Self {
            status: RecordStatus::Claimed,
            owner_token: owner_token.to_string(),
            lease_expires_at_ms: verified::compute_lease_deadline(now_ms, lease_ms),
            completed_at_ms: None,
            retention_expires_at_ms: None,
            result_payload: None,
            error_payload: None,
            fencing_token: verified::compute_next_fencing_token(self.fencing_token),
            ..self.clone()
        }
    }

    /// Transition to `Completed` with a cached result.
    pub fn completed(&self, result_payload: String, retention_ms: u64, now_ms: u64) -> Self {
        Self {
            status: RecordStatus::Completed,
            completed_at_ms: Some(now_ms),
            retention_expires_at_ms: Some(verified::compute_retention_deadline(now_ms, retention_ms)),
            result_payload: Some(result_payload),
            error_payload: None,
            ..self.clone()
        }
    }

    /// Transition to `Failed` with a cached error.
    pub fn failed(&self, error_payload: String, retention_ms: u64, now_ms: u64) -> Self {
        Self {
            status: RecordStatus::Failed,
            completed_at_ms: Some(now_ms),
            retention_expires_at_ms: Some(verified::compute_retention_deadline(now_ms, retention_ms)),
            result_payload: None,
            error_payload: Some(error_payload),
            ..self.clone()
        }
    }

    /// Same claim with a later lease deadline.
    pub fn renewed(&self, requested_expires_at_ms: u64) -> Self {
        Self {
            lease_expires_at_ms: verified::compute_renewed_deadline(self.lease_expires_at_ms, requested_expires_at_ms),
            ..self.clone()
        }
    }

    /// Rebuild the key this record belongs to.
    pub fn key(&self) -> Result<IdempotencyKey, KeyError> {
        IdempotencyKey::new(self.scope.clone(), self.token.clone())
    }

    /// How a caller should treat this record at `now_ms`.
    pub fn disposition(&self, now_ms: u64) -> RecordDisposition {
        verified::classify_record(self.status, self.lease_expires_at_ms, now_ms)
    }

    /// Whether `owner_token` holds this claim.
    pub fn is_owned_by(&self, owner_token: &str) -> bool {
        verified::is_owned_claim(self.status, &self.owner_token, owner_token)
    }

    /// `Claimed` with a lapsed lease.
    pub fn is_lease_expired(&self, now_ms: u64) -> bool {
        self.status == RecordStatus::Claimed && verified::is_lease_expired(self.lease_expires_at_ms, now_ms)
    }

    /// Terminal with a lapsed retention window.
    pub fn is_retention_expired(&self, now_ms: u64) -> bool {
        match (self.status, self.retention_expires_at_ms) {
            (RecordStatus::Claimed, _) => false,
            (_, Some(deadline)) => verified::is_retention_expired(deadline, now_ms),
            // terminal without retention is corrupt; let the reaper clear it
            (_, None) => true,
        }
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status != RecordStatus::Claimed
    }

    /// Check the payload and retention invariants for the record's status.
    pub fn validate(&self) -> Result<(), String> {
        match self.status {
            RecordStatus::Claimed => Ok(()),
            RecordStatus::Completed if self.result_payload.is_none() => {
                Err("completed record has no result payload".to_string())
            }
            RecordStatus::Failed if self.error_payload.is_none() => {
                Err("failed record has no error payload".to_string())
            }
            RecordStatus::Completed | RecordStatus::Failed => match (self.completed_at_ms, self.retention_expires_at_ms) {
                (Some(done), Some(retain)) if retain > done => Ok(()),
                (Some(_), Some(_)) => Err("retention deadline does not follow completion".to_string()),
                _ => Err("terminal record missing completion or retention timestamps".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdempotencyKey {
        IdempotencyKey::new("payments", "abc123").unwrap()
    }

    #[test]
    fn test_fresh_claim() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000);
        assert_eq!(record.status, RecordStatus::Claimed);
        assert_eq!(record.lease_expires_at_ms, 31_000);
        assert_eq!(record.created_at_ms, 1_000);
        assert_eq!(record.fencing_token, 1);
        assert!(record.is_owned_by("owner-a"));
        assert!(!record.is_owned_by("owner-b"));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_reclaim_bumps_fencing_token_and_keeps_created_at() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 2_000, 1_000);
        let reclaimed = record.reclaimed("owner-b", 2_000, 4_000);
        assert_eq!(reclaimed.owner_token, "owner-b");
        assert_eq!(reclaimed.fencing_token, 2);
        assert_eq!(reclaimed.created_at_ms, 1_000);
        assert_eq!(reclaimed.lease_expires_at_ms, 6_000);
    }

    #[test]
    fn test_completed_record() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000);
        let done = record.completed("\"ok\"".to_string(), 60_000, 2_000);
        assert_eq!(done.status, RecordStatus::Completed);
        assert_eq!(done.completed_at_ms, Some(2_000));
        assert_eq!(done.retention_expires_at_ms, Some(62_000));
        assert!(done.is_terminal());
        assert!(!done.is_owned_by("owner-a"));
        assert!(done.validate().is_ok());
        assert!(!done.is_retention_expired(62_000));
        assert!(done.is_retention_expired(62_001));
    }

    #[test]
    fn test_failed_record() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000);
        let failed = record.failed("\"declined\"".to_string(), 60_000, 2_000);
        assert_eq!(failed.status, RecordStatus::Failed);
        assert_eq!(failed.error_payload.as_deref(), Some("\"declined\""));
        assert!(failed.result_payload.is_none());
        assert!(failed.validate().is_ok());
    }

    #[test]
    fn test_renew_never_shortens() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000);
        assert_eq!(record.renewed(10_000).lease_expires_at_ms, 31_000);
        assert_eq!(record.renewed(50_000).lease_expires_at_ms, 50_000);
    }

    #[test]
    fn test_validate_rejects_missing_payload() {
        let mut record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000).completed("1".into(), 10, 5);
        record.result_payload = None;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_json_uses_snake_case_status_and_omits_empty_fields() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 30_000, 1_000);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"claimed\""));
        assert!(!json.contains("result_payload"));
        let parsed: IdempotencyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_lease_expiry_only_applies_to_claims() {
        let record = IdempotencyRecord::claimed(&key(), "owner-a", 1_000, 0);
        assert!(!record.is_lease_expired(1_000));
        assert!(record.is_lease_expired(1_001));
        let done = record.completed("1".into(), 10_000, 500);
        assert!(!done.is_lease_expired(5_000));
    }
}
