//! Provider adapters
//!
//! Every external trust service implements the same two-operation contract:
//! `push` delivers one anchor record, `test_connection` validates settings
//! without creating a permanent remote artifact. Expected failure modes
//! (auth, rate limit, rejection, conflict) are mapped to a structured
//! `PushFailure` so the dispatcher can apply one backoff policy; `Err` is
//! reserved for local faults, which the dispatcher always retries.

pub mod github;
pub mod gitlab;
pub mod rekor;
pub mod rfc3161;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ProviderError, RelayError};
use crate::record::AnchorRecord;

pub use github::GithubProvider;
pub use gitlab::GitlabProvider;
pub use rekor::RekorProvider;
pub use rfc3161::TsaProvider;

/// Stable provider key
///
/// Wire format (JSON, leg maps, log rows) uses the lowercase name. The
/// variant order is the fixed attempt/display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    Github,
    Gitlab,
    Tsa,
    Rekor,
}

impl ProviderKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::Github => "github",
            ProviderKey::Gitlab => "gitlab",
            ProviderKey::Tsa => "tsa",
            ProviderKey::Rekor => "rekor",
        }
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful delivery
#[derive(Debug, Clone, PartialEq)]
pub struct PushSuccess {
    /// Where the anchor can be seen, if the service has a stable URL
    pub url: Option<String>,

    /// Service-specific diagnostics (serial numbers, log indexes, ...)
    pub details: serde_json::Value,
}

impl PushSuccess {
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Structured delivery failure
#[derive(Debug, Clone, PartialEq)]
pub struct PushFailure {
    pub error: String,
    pub retryable: bool,
    pub rate_limited: bool,
    pub http_status: Option<u16>,
}

impl PushFailure {
    /// Permanent rejection, no further attempts
    pub fn permanent(error: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            error: error.into(),
            retryable: false,
            rate_limited: false,
            http_status,
        }
    }

    /// Transient failure, retried with backoff
    pub fn transient(error: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            error: error.into(),
            retryable: true,
            rate_limited: false,
            http_status,
        }
    }

    /// Rate limit, retried with backoff and flagged for operators
    pub fn rate_limited(error: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            error: error.into(),
            retryable: true,
            rate_limited: true,
            http_status,
        }
    }
}

/// Outcome of one push attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Anchored(PushSuccess),
    Failed(PushFailure),
}

/// Result of a connection test
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub success: bool,
    pub message: String,
}

impl ConnectionStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// External trust service adapter
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable key identifying this provider in leg maps and log rows
    fn key(&self) -> ProviderKey;

    /// Deliver one anchor record
    ///
    /// Must be idempotent enough that re-invocation after a crash does not
    /// corrupt remote state. `Err` means a local fault, not a delivery
    /// failure; the dispatcher retries it.
    async fn push(&self, record: &AnchorRecord) -> Result<PushOutcome, ProviderError>;

    /// Minimal read-only or dry-run call validating settings/reachability
    async fn test_connection(&self) -> Result<ConnectionStatus, ProviderError>;
}

/// Build the active provider set from configuration
///
/// A git-host provider is active only when its token (and repo coordinates)
/// are present; the TSA only when enabled with an endpoint; the transparency
/// log only when explicitly enabled. Order is the fixed attempt order.
pub fn active_providers(config: &Config) -> Result<Vec<Arc<dyn Provider>>, RelayError> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if config.github.is_enabled() {
        providers.push(Arc::new(GithubProvider::new(config.github.clone())?));
    }
    if config.gitlab.is_enabled() {
        providers.push(Arc::new(GitlabProvider::new(config.gitlab.clone())?));
    }
    if config.tsa.is_enabled() {
        providers.push(Arc::new(TsaProvider::new(config.tsa.clone())?));
    }
    if config.rekor.is_enabled() {
        providers.push(Arc::new(RekorProvider::new(config.rekor.clone())?));
    }

    Ok(providers)
}
