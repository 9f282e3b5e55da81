//! Error types for the janus gateway.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using janus's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for janus operations.
///
/// The variant names form the stable error taxonomy surfaced to callers:
/// input errors are never retried, quota errors carry a `reset_at`, upstream
/// errors are retried internally with bounded backoff before being surfaced
/// as `UpstreamUnavailable`, and deadline errors surface immediately.
#[derive(Error, Debug)]
pub enum Error {
    /// Query text was empty or whitespace-only.
    #[error("Empty query")]
    EmptyQuery,

    /// Concept not found.
    #[error("Concept not found: {0}")]
    ConceptNotFound(Uuid),

    /// Generic resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Vector dimension does not match the deployment dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Relation endpoints or type are invalid.
    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tenant is not registered with the quota gate.
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// A quota limit was hit; the caller may retry after `reset_at`.
    #[error("Quota exceeded for {resource}, resets at {reset_at}")]
    QuotaExceeded {
        resource: String,
        reset_at: DateTime<Utc>,
    },

    /// Vector engine operation failed.
    #[error("Vector backend error: {0}")]
    VectorBackend(String),

    /// Concept metadata persistence failed.
    #[error("Metadata backend error: {0}")]
    MetadataBackend(String),

    /// Relational engine operation failed.
    #[error("Relational backend error: {0}")]
    RelationalBackend(String),

    /// Embedding generation failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// LLM intent tier failed (degrades silently to deterministic intent).
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// An upstream dependency stayed unavailable through the retry budget.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A request deadline expired.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Both sides of a sync changed and the policy could not resolve it.
    #[error("Sync conflict: {0}")]
    SyncConflict(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed.
    #[error("Request error: {0}")]
    Request(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry budget applies to this error.
    ///
    /// Only upstream failures are retryable; input, quota, and deadline
    /// errors short-circuit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VectorBackend(_)
                | Error::MetadataBackend(_)
                | Error::RelationalBackend(_)
                | Error::Embedding(_)
                | Error::Request(_)
        )
    }

    /// Collapse a retried upstream error into the stable surfaced form.
    pub fn into_unavailable(self) -> Error {
        match self {
            e @ (Error::VectorBackend(_)
            | Error::MetadataBackend(_)
            | Error::RelationalBackend(_)
            | Error::Embedding(_)
            | Error::Request(_)) => Error::UpstreamUnavailable(e.to_string()),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
