//! Size limits for key-value requests.
//!
//! Tiger Style: every bound is a fixed constant so a single request can never
//! allocate without limit.

/// Maximum size of a single key in bytes (1 KB).
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single value in bytes (1 MB).
///
/// Cached operation results live inside the record value, so this also bounds
/// the largest result the coordinator can replay.
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

/// Maximum number of keys that can be returned in a single scan.
pub const MAX_SCAN_RESULTS: u32 = 10_000;

/// Default number of keys returned in a scan if limit is not specified.
pub const DEFAULT_SCAN_LIMIT: u32 = 1_000;
