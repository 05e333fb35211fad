//! Error types for the proxy

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum Error {
    /// Backend write error
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Spill log error
    #[error("Spill error: {0}")]
    Spill(#[from] SpillError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Submit error
    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome classification for a single backend write.
///
/// The three kinds are closed on purpose: every HTTP response and every
/// transport failure maps onto exactly one of them, and each kind carries
/// a fixed engine policy (drop, drop, spill/retry).
#[derive(Error, Debug)]
pub enum WriteError {
    /// Backend rejected the payload (4xx other than 404). The batch is
    /// permanently dropped.
    #[error("backend rejected batch (status {status})")]
    BadRequest {
        /// HTTP status code returned by the backend
        status: u16,
    },

    /// Backend URL or database unknown (404). The batch is permanently
    /// dropped.
    #[error("backend endpoint or database not found")]
    NotFound,

    /// Any other failure: timeout, connection error, 5xx, 429, body-read
    /// error. The live path spills; the rewrite path rolls back and
    /// retries after a back-off.
    #[error("transient backend failure: {0}")]
    Transient(String),
}

impl WriteError {
    /// Whether the batch should be kept for redelivery.
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

/// Spill log error types
#[derive(Error, Debug)]
pub enum SpillError {
    /// I/O error during a spill operation
    #[error("spill I/O error ({context}): {source}")]
    Io {
        /// The underlying I/O error
        source: io::Error,
        /// What operation failed
        context: String,
    },

    /// A record body was shorter than its length prefix announced
    #[error("truncated spill record in {path:?}: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        /// Path of the data file
        path: PathBuf,
        /// Bytes announced by the length prefix
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// A spill record payload did not contain the two space separators
    #[error("malformed spill record: {0} parts")]
    MalformedRecord(usize),

    /// A spill record's db or rp failed percent-decoding
    #[error("undecodable identifier in spill record")]
    InvalidIdentifier,
}

impl SpillError {
    pub(crate) fn io(source: io::Error, context: impl Into<String>) -> Self {
        SpillError::Io {
            source,
            context: context.into(),
        }
    }
}

/// Result type for spill operations
pub type SpillResult<T> = Result<T, SpillError>;

/// Error returned by [`BackendEngine::submit`](crate::engine::BackendEngine::submit).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The engine has been closed; no further points are accepted.
    #[error("engine is closed")]
    Closed,
}

/// Configuration validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No circles configured
    #[error("circles cannot be empty")]
    EmptyCircles,

    /// A circle has no backends
    #[error("backends cannot be empty in circle {circle:?}")]
    EmptyBackends {
        /// Name of the offending circle
        circle: String,
    },

    /// A backend has no name
    #[error("backend name cannot be empty in circle {circle:?}")]
    EmptyBackendName {
        /// Name of the offending circle
        circle: String,
    },

    /// Two backends share a name
    #[error("backend name duplicated: {name:?}")]
    DuplicatedBackendName {
        /// The duplicated name
        name: String,
    },

    /// A numeric option that must be positive is zero
    #[error("{field} must be > 0")]
    NonPositive {
        /// The offending option
        field: &'static str,
    },
}
