//! Error types and result aliases shared across Argent components.
//!
//! Component-specific taxonomies (schema violations, merge-state failures)
//! live in the crates that raise them; this module defines the errors every
//! layer can produce.

use std::fmt;

/// The result type used throughout Argent.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core Argent operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid or contradictory dataset descriptor field.
    ///
    /// Always raised before any I/O; the `field` names the offending
    /// descriptor entry so the message is actionable.
    #[error("configuration error in `{field}`: {message}")]
    Configuration {
        /// The descriptor field that failed validation.
        field: &'static str,
        /// Description of the contradiction.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration error for the given descriptor field.
    #[must_use]
    pub fn configuration(field: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            message: message.into(),
        }
    }

    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error from a display-able cause.
    #[must_use]
    pub fn serialization(context: &str, cause: impl fmt::Display) -> Self {
        Self::Serialization {
            message: format!("{context}: {cause}"),
        }
    }

    /// Returns true if this error is a `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
