//! Error taxonomy for the Silver engine.
//!
//! The variants map one-to-one onto how failures propagate:
//!
//! - [`SilverError::Configuration`] — fatal, raised before any I/O
//! - [`SilverError::SchemaViolation`] — per-row; recoverable under lenient
//!   or auto policy, or via error-policy quarantine
//! - [`SilverError::MergeState`] — fatal to the partition, isolated from
//!   siblings unless job-wide abort is configured
//! - [`SilverError::Integrity`] — always surfaced, never auto-repaired
//! - [`SilverError::Write`] — transient storage failure, signalled upward;
//!   retry/backoff belongs to the storage collaborator

use thiserror::Error;

/// Result type alias for Silver engine operations.
pub type Result<T> = std::result::Result<T, SilverError>;

/// Errors that can occur while promoting a load to Silver.
#[derive(Debug, Error)]
pub enum SilverError {
    /// Invalid or contradictory dataset descriptor.
    #[error("configuration error in `{field}`: {message}")]
    Configuration {
        /// The descriptor field that failed validation.
        field: &'static str,
        /// Description of the contradiction.
        message: String,
    },

    /// A row failed schema validation or coercion.
    #[error("schema violation in column `{column}`: {reason}")]
    SchemaViolation {
        /// The offending column.
        column: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Prior current-state artifact required but missing or corrupt.
    #[error("merge state error: {message}")]
    MergeState {
        /// Description of the state problem.
        message: String,
    },

    /// Checksum mismatch or missing integrity metadata.
    #[error("integrity error: {message}")]
    Integrity {
        /// Description of the integrity failure.
        message: String,
    },

    /// Bad-record thresholds exceeded for a partition.
    #[error("quality thresholds exceeded: {message}")]
    QualityThreshold {
        /// Which threshold failed and by how much.
        message: String,
    },

    /// The load was cancelled cooperatively.
    #[error("load cancelled")]
    Cancelled,

    /// A storage write failed.
    #[error("write failure: {message}")]
    Write {
        /// Description of the write failure.
        message: String,
    },

    /// Error from a core primitive (storage read, serialization, paths).
    #[error(transparent)]
    Core(#[from] argent_core::Error),
}

impl SilverError {
    /// Creates a merge-state error.
    #[must_use]
    pub fn merge_state(message: impl Into<String>) -> Self {
        Self::MergeState {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a schema-violation error.
    #[must_use]
    pub fn schema_violation(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors isolated to a single partition.
    ///
    /// Partition-scoped failures don't abort sibling partitions unless
    /// job-wide abort is configured.
    #[must_use]
    pub fn is_partition_scoped(&self) -> bool {
        matches!(
            self,
            Self::SchemaViolation { .. } | Self::MergeState { .. } | Self::QualityThreshold { .. }
        )
    }
}
