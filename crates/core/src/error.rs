//! Unified error types for offsync.
//!
//! Every variant renders with a stable upper-case code prefix so the host
//! surface and logs can match on it.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the offline caching and sync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// A mutation failed validation before it was persisted.
    #[error("INVALID_MUTATION: {0}")]
    InvalidMutation(String),

    /// No mutation with this id is in the expected state.
    #[error("MUTATION_NOT_FOUND: {0}")]
    MutationNotFound(String),

    /// A persisted mutation row could not be decoded.
    #[error("QUEUE_CORRUPTION: {id}: {reason}")]
    QueueCorruption { id: String, reason: String },

    /// The remote store rejected a mutation as invalid.
    #[error("PERMANENT_REJECTION: {id}: {reason}")]
    PermanentRejection { id: String, reason: String },

    /// No cache entry found for the given request.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Attempted to store a response that must never be cached.
    #[error("UNCACHEABLE_RESPONSE: status {0}")]
    UncacheableResponse(u16),

    /// Named generation does not exist.
    #[error("UNKNOWN_GENERATION: {0}")]
    UnknownGeneration(String),

    /// A superseded generation could not be swept.
    #[error("GENERATION_ACTIVATION: {0}")]
    GenerationActivation(String),

    /// Install could not cache anything from the manifest.
    #[error("INSTALL_FAILED: {0}")]
    InstallFailed(String),

    /// Transport-level failure talking to the network.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Network call exceeded its time bound.
    #[error("NETWORK_TIMEOUT: {0}")]
    Timeout(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored JSON could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the failure is worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidUrl(_) | Error::InvalidMutation(_) => -32602,
            Error::CacheMiss(_) => -32001,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Serialization(_) => -32002,
            Error::Network(_) => -32003,
            Error::Timeout(_) => -32004,
            Error::MutationNotFound(_) => -32005,
            Error::QueueCorruption { .. } => -32006,
            Error::PermanentRejection { .. } => -32007,
            Error::UncacheableResponse(_) => -32008,
            Error::UnknownGeneration(_) | Error::GenerationActivation(_) => -32009,
            Error::InstallFailed(_) => -32010,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
