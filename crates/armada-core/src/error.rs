//! Error types and result aliases for armada.
//!
//! The error contract mirrors the failure modes of the shared store and the
//! control loops built on it. Callers dispatch on the variant:
//!
//! - [`Error::NotFound`] — the record does not exist
//! - [`Error::PreconditionFailed`] — a compare-and-swap lost; abandon and retry
//! - [`Error::Transient`] — network/timeout class failures; retry with backoff
//! - [`Error::Fatal`] — malformed state or invariant violation; propagate
//! - [`Error::Unhealthy`] — liveness lost; the server supervisor restarts

/// The result type used throughout armada.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in armada operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record was not found.
    #[error("not found: {resource} {key}")]
    NotFound {
        /// The kind of record that was looked up.
        resource: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// A compare-and-swap guarded write lost the race.
    #[error("precondition failed on {key}: expected revision {expected:?}, found {actual:?}")]
    PreconditionFailed {
        /// The key the write targeted.
        key: String,
        /// The revision the caller expected, if any.
        expected: Option<u64>,
        /// The revision actually present, if any.
        actual: Option<u64>,
    },

    /// A retryable failure (network, timeout, lagging event stream).
    #[error("transient failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An unrecoverable failure: malformed state, invariant violation, or
    /// invalid configuration.
    #[error("fatal: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// The local machine's liveness heartbeat was lost.
    #[error("unhealthy: {message}")]
    Unhealthy {
        /// Description of the failed health check.
        message: String,
    },

    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the identifier invalid.
        message: String,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a not-found error for a record kind and key.
    #[must_use]
    pub fn not_found(resource: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            key: key.into(),
        }
    }

    /// Creates a transient error with the given message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error with a source cause.
    #[must_use]
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a fatal error with the given message.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates an unhealthy error with the given message.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::Unhealthy {
            message: message.into(),
        }
    }

    /// Creates a serialization error from a JSON failure.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if the caller should retry with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if a compare-and-swap lost the race.
    #[must_use]
    pub const fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. })
    }

    /// Returns true if the record was absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
