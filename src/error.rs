// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication applier.
//!
//! Errors are categorized along the lines callers actually branch on:
//! retry with backoff, restart the stream, fall back to a full resync, or
//! stop and surface the problem.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Resync | Description |
//! |------------|-----------|--------|-------------|
//! | `NoResponse` | Yes | No | Leader unreachable, request timed out |
//! | `LeaderError` | Yes | No | Leader returned a non-2xx status |
//! | `InvalidResponse` | No | No | Missing header, malformed batch body |
//! | `RequiredTickNotPresent` | No | Yes | Requested tick no longer in the leader's retained log |
//! | `NoStartTick` | No | Yes | No usable resume point exists |
//! | `DataSourceNotFound` | No | Yes | Target database/collection missing on the follower |
//! | `UnexpectedTransaction` | No | No | Transaction bookkeeping violated (protocol mismatch or bug) |
//! | `UnexpectedMarkerKind` | No | No | Log entry kind outside the known protocol |
//! | `Apply` | No | No | Entry failed to apply and the ignore budget is exhausted |
//! | `StateStore` | No | No | Local SQLite problem (needs operator attention) |
//! | `Config` | No | No | Configuration invalid |
//! | `Resync` | No | No | The full resynchronization itself failed |
//! | `Stopped` | No | No | Cooperative stop was requested |
//!
//! # Propagation
//!
//! Inner components never retry on their own (except the bounded network
//! retry inside the batch fetch); they return one of these variants and the
//! engine alone decides stop vs. retry vs. resync, using
//! [`ApplierError::is_retryable()`] and [`ApplierError::requires_resync()`].

use thiserror::Error;

/// Result type alias for applier operations.
pub type Result<T> = std::result::Result<T, ApplierError>;

/// Errors that can occur while tailing and applying the leader's log.
#[derive(Error, Debug)]
pub enum ApplierError {
    /// No response from the leader (connection refused, reset, timeout).
    ///
    /// Retryable with exponential backoff up to the configured budget.
    #[error("no response from leader ({operation}): {message}")]
    NoResponse { operation: String, message: String },

    /// The leader answered with a non-2xx status.
    ///
    /// Retryable; the leader may be restarting or momentarily overloaded.
    #[error("leader error ({operation}): HTTP {status}: {message}")]
    LeaderError {
        operation: String,
        status: u16,
        message: String,
    },

    /// The leader's response was missing required metadata or the batch
    /// body could not be decoded. Fatal for the current stream cycle.
    #[error("invalid leader response: {0}")]
    InvalidResponse(String),

    /// The tick we need to resume from is no longer present on the leader.
    ///
    /// The leader's log has been truncated past our cursor. Only a full
    /// resynchronization can close the gap.
    #[error("required tick {requested} not present on leader (leader head {leader_head})")]
    RequiredTickNotPresent { requested: u64, leader_head: u64 },

    /// No start tick could be determined (no persisted state, no explicit
    /// tick, and the leader provided no usable floor).
    #[error("no start tick available for tailing")]
    NoStartTick,

    /// A database or collection targeted by a log entry does not exist on
    /// the follower. Escalated to the resync path for regular collections;
    /// tolerated as a no-op for system collections.
    #[error("data source not found: {database}/{collection}")]
    DataSourceNotFound {
        database: String,
        collection: String,
    },

    /// Transaction bookkeeping was violated: a `TxStart` for an id that is
    /// already open, or a commit/abort for an id that is not.
    ///
    /// Never ignorable; indicates a leader/follower protocol mismatch or
    /// internal corruption.
    #[error("unexpected transaction: remote id {remote_id} ({context})")]
    UnexpectedTransaction { remote_id: u64, context: String },

    /// A log entry carried a marker kind outside the known protocol.
    #[error("unexpected marker kind: {kind}")]
    UnexpectedMarkerKind { kind: String },

    /// An entry failed to apply and the per-run ignore budget is exhausted.
    ///
    /// Carries the offending raw entry (truncated) for diagnostics.
    #[error("failed to apply log entry at tick {tick}: {message}; entry: {raw}")]
    Apply {
        tick: u64,
        message: String,
        raw: String,
    },

    /// SQLite error from the applier state store.
    #[error("state store error: {0}")]
    StateStore(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The full resynchronization fallback itself failed.
    #[error("full resync failed: {0}")]
    Resync(String),

    /// Cooperative stop was requested; not a failure.
    #[error("stop requested")]
    Stopped,
}

impl ApplierError {
    /// Create a `NoResponse` error.
    pub fn no_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NoResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a `LeaderError` from a status code.
    pub fn leader(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::LeaderError {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Check if the operation should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResponse { .. } | Self::LeaderError { .. })
    }

    /// Check if this error should be handed to the resync controller
    /// instead of terminating the applier outright.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            Self::RequiredTickNotPresent { .. }
                | Self::NoStartTick
                | Self::DataSourceNotFound { .. }
        )
    }

    /// Check if this error marks a programmer/protocol invariant violation
    /// that must never be swallowed by the ignore-errors budget.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedTransaction { .. } | Self::UnexpectedMarkerKind { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_no_response() {
        let err = ApplierError::no_response("tail", "connection reset");
        assert!(err.is_retryable());
        assert!(!err.requires_resync());
        assert!(err.to_string().contains("tail"));
    }

    #[test]
    fn test_is_retryable_leader_error() {
        let err = ApplierError::leader("open-transactions", 503, "maintenance");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_not_retryable_invalid_response() {
        let err = ApplierError::InvalidResponse("missing x-replication-lasttick".to_string());
        assert!(!err.is_retryable());
        assert!(!err.requires_resync());
    }

    #[test]
    fn test_required_tick_requires_resync() {
        let err = ApplierError::RequiredTickNotPresent {
            requested: 5,
            leader_head: 1000,
        };
        assert!(!err.is_retryable());
        assert!(err.requires_resync());
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_no_start_tick_requires_resync() {
        assert!(ApplierError::NoStartTick.requires_resync());
    }

    #[test]
    fn test_data_source_not_found_requires_resync() {
        let err = ApplierError::DataSourceNotFound {
            database: "orders".to_string(),
            collection: "items".to_string(),
        };
        assert!(err.requires_resync());
        assert!(err.to_string().contains("orders/items"));
    }

    #[test]
    fn test_unexpected_transaction_is_invariant() {
        let err = ApplierError::UnexpectedTransaction {
            remote_id: 7,
            context: "start for already-open id".to_string(),
        };
        assert!(err.is_invariant_violation());
        assert!(!err.is_retryable());
        assert!(!err.requires_resync());
    }

    #[test]
    fn test_unexpected_marker_kind_is_invariant() {
        let err = ApplierError::UnexpectedMarkerKind {
            kind: "shard-migrate".to_string(),
        };
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("shard-migrate"));
    }

    #[test]
    fn test_apply_error_carries_raw_entry() {
        let err = ApplierError::Apply {
            tick: 42,
            message: "write-write conflict".to_string(),
            raw: r#"{"tick":"42","type":"document-upsert"}"#.to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_invariant_violation());
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("document-upsert"));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let err = ApplierError::Stopped;
        assert!(!err.is_retryable());
        assert!(!err.requires_resync());
    }
}
