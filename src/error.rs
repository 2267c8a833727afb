//! Relay error types

use thiserror::Error;

/// Main relay error type
#[derive(Debug, Error)]
pub enum RelayError {
    /// Queue operation failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Provider adapter failed with a local fault
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Queue and persistence errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Key-value store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Queue blob could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Job not found in the queue
    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),
}

impl From<std::io::Error> for QueueError {
    fn from(e: std::io::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}

/// Local faults inside a provider adapter
///
/// Expected delivery failures (auth, rate limit, rejection) are NOT errors -
/// adapters map those to a structured `PushFailure`. This enum covers faults
/// the dispatcher catches and retries uniformly.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider is missing required settings
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Network communication error
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// ASN.1 encoding/decoding error
    #[error("ASN.1 error: {0}")]
    Asn1(#[from] crate::asn1::Asn1Error),

    /// Signing key error
    #[error("signing error: {0}")]
    Signing(#[from] crate::signing::SigningError),

    /// Sidecar artifact could not be written
    #[error("artifact error: {0}")]
    Artifact(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
