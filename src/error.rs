//! Error types for idempotent execution.
//!
//! Two channels exist. [`IdempotencyError`] is what callers see. [`StoreError`]
//! is the vocabulary spoken between a [`PersistenceStore`](crate::persistence::PersistenceStore)
//! and the coordinator; the coordinator always consumes or converts it, so it never
//! reaches the caller of [`execute`](crate::coordinator::IdempotencyCoordinator::execute).

use thiserror::Error;

use crate::serdes::SerDesError;

/// Boxed error used to carry backend causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Caller-visible failures of an idempotent execution.
///
/// The wrapped operation's own error never appears here: the coordinator hands it
/// back unchanged through the operation's error type.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The idempotency key could not be derived from the request.
    #[error("Idempotency key error: {message}")]
    Key {
        /// What went wrong while selecting or hashing the key
        message: String,
    },

    /// Another invocation currently holds the IN_PROGRESS marker for this key.
    #[error("Execution already in progress with idempotency key: {key}")]
    AlreadyInProgress {
        /// The contested idempotency key
        key: String,
    },

    /// A completed record exists for the key but was produced by a different payload.
    #[error("Payload validation failed for idempotency key {key}: {message}")]
    Validation {
        /// The idempotency key whose fingerprint mismatched
        key: String,
        /// Description of the mismatch
        message: String,
    },

    /// The store kept reporting contradictory state after all retries.
    #[error("Inconsistent idempotency state for key {key} after {attempts} attempts")]
    InconsistentState {
        /// The idempotency key
        key: String,
        /// Total number of attempts made
        attempts: u32,
    },

    /// The persistence backend failed. Never retried by the coordinator.
    #[error("Persistence layer error: {message}")]
    PersistenceLayer {
        /// Error message describing what went wrong
        message: String,
        /// The backend cause, if any
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid configuration detected while building a coordinator.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the invalid setting
        message: String,
    },
}

impl IdempotencyError {
    /// Creates a new Key error.
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
        }
    }

    /// Creates a new AlreadyInProgress error.
    pub fn already_in_progress(key: impl Into<String>) -> Self {
        Self::AlreadyInProgress { key: key.into() }
    }

    /// Creates a new Validation error.
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new InconsistentState error.
    pub fn inconsistent_state(key: impl Into<String>, attempts: u32) -> Self {
        Self::InconsistentState {
            key: key.into(),
            attempts,
        }
    }

    /// Creates a new PersistenceLayer error without an underlying cause.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceLayer {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new PersistenceLayer error wrapping a backend cause.
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::PersistenceLayer {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if this is a Key error.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key { .. })
    }

    /// Returns true if another invocation holds the key.
    pub fn is_already_in_progress(&self) -> bool {
        matches!(self, Self::AlreadyInProgress { .. })
    }

    /// Returns true if this is a payload Validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true if retries on inconsistent state were exhausted.
    pub fn is_inconsistent_state(&self) -> bool {
        matches!(self, Self::InconsistentState { .. })
    }

    /// Returns true if this is a PersistenceLayer error.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::PersistenceLayer { .. })
    }

    /// Returns true if this is a Configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<SerDesError> for IdempotencyError {
    fn from(error: SerDesError) -> Self {
        Self::persistence_with_source(error.to_string(), error)
    }
}

/// Outcomes a [`PersistenceStore`](crate::persistence::PersistenceStore) reports
/// besides plain success.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional insert found a live record for the key.
    #[error("Idempotency record already exists")]
    AlreadyExists,

    /// No record is stored under the requested key.
    #[error("Idempotency record not found")]
    ItemNotFound,

    /// The backend itself failed.
    #[error("Backend error: {message}")]
    Backend {
        /// Error message describing what went wrong
        message: String,
        /// The backend cause, if any
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new Backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new Backend error wrapping the underlying cause.
    pub fn backend_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Converts this store outcome into a caller-visible error.
    ///
    /// `context` describes the store call that produced it.
    pub(crate) fn into_persistence(self, context: &str) -> IdempotencyError {
        match self {
            Self::Backend { message, source } => IdempotencyError::PersistenceLayer {
                message: format!("{}: {}", context, message),
                source,
            },
            other => IdempotencyError::persistence(format!("{}: unexpected {}", context, other)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::backend_with_source("Malformed idempotency record", error)
    }
}
