//! Key-value store seam for the idempotency coordinator.
//!
//! The coordinator never talks to a concrete database. It persists its records
//! through the [`KeyValueStore`] trait, which only has to provide linearizable
//! reads, compare-and-swap, compare-and-delete and prefix scans. Anything that
//! offers those primitives (a Raft-backed KV, an SQL table with a unique index,
//! the in-memory store in `idemkit-testing`) can back the coordinator.
//!
//! ## Module Organization
//!
//! - [`constants`]: Fixed size limits applied to every request
//! - [`read`]: Read and delete request types
//! - [`scan`]: Prefix scan request types
//! - [`mod@write`]: Write commands, including CAS and compare-and-delete
//! - [`validation`]: Size-limit validation for write commands

pub mod constants;
mod error;
pub mod read;
pub mod scan;
mod traits;
pub mod validation;
pub mod write;

pub use constants::DEFAULT_SCAN_LIMIT;
pub use constants::MAX_KEY_SIZE;
pub use constants::MAX_SCAN_RESULTS;
pub use constants::MAX_VALUE_SIZE;
pub use error::KeyValueStoreError;
pub use read::DeleteRequest;
pub use read::DeleteResult;
pub use read::KeyValueWithRevision;
pub use read::ReadRequest;
pub use read::ReadResult;
pub use scan::ScanRequest;
pub use scan::ScanResult;
pub use traits::KeyValueStore;
pub use validation::validate_scan_request;
pub use validation::validate_write_command;
pub use write::WriteCommand;
pub use write::WriteRequest;
pub use write::WriteResult;
