//! Error types and result aliases for tidal.
//!
//! This module defines the shared error type used by the storage, URI and
//! credential layers. Table-format errors live in `tidal-delta` and wrap this
//! type when a storage operation fails underneath them.

/// The result type used throughout tidal-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in storage and configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value (path, option, prefix) was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A table URI could not be parsed.
    #[error("invalid table uri '{uri}': {message}")]
    InvalidUri {
        /// The offending URI string.
        uri: String,
        /// Why the URI was rejected.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's credentials were rejected by the storage service.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
        /// Error reported by the store.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store could not complete a request.
    #[error("storage error: {message}")]
    Storage {
        /// Operation and key that failed.
        message: String,
        /// Client or transport error, when there is one.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bytes could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// What failed to encode or decode.
        message: String,
    },

    /// The requested storage scheme or feature is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A broken invariant, such as a poisoned lock.
    #[error("internal error: {message}")]
    Internal {
        /// Which invariant broke.
        message: String,
    },
}

impl Error {
    /// Store failure without an underlying cause.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Store failure wrapping the client error.
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

    /// Creates a new permission error with a source cause.
    #[must_use]
    pub fn permission_denied(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new invalid URI error.
    #[must_use]
    pub fn invalid_uri(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
