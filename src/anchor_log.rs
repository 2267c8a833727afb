//! Durable anchor delivery log
//!
//! One row per delivery attempt, success or failure. Append-only: rows are
//! never mutated or deduplicated, outlive their originating job, and are
//! pruned only by the scheduled retention pass. The read path is an
//! external reporting concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::QueueError;
use crate::providers::ProviderKey;
use crate::queue::KvStore;

const LOG_KEY: &str = "anchor_relay.log";

/// Delivery attempt outcome as recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Delivered; the leg is done
    Anchored,
    /// Failed but rescheduled
    Retry,
    /// Failed permanently
    Failed,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Anchored => write!(f, "anchored"),
            LogStatus::Retry => write!(f, "retry"),
            LogStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorLogEntry {
    pub job_id: Uuid,
    pub attempt: u32,
    pub provider: ProviderKey,
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnchorLogEntry {
    pub fn new(job_id: Uuid, attempt: u32, provider: ProviderKey, status: LogStatus) -> Self {
        Self {
            job_id,
            attempt,
            provider,
            status,
            url: None,
            http_status: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_http_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Append-only log port
#[async_trait]
pub trait AnchorLog: Send + Sync {
    /// Record one delivery attempt
    async fn append(&self, entry: AnchorLogEntry) -> Result<(), QueueError>;

    /// Drop rows older than `cutoff`, returning how many were removed
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError>;
}

/// Log stored as one JSON array behind the key-value port
pub struct KvAnchorLog {
    store: Arc<dyn KvStore>,
}

impl KvAnchorLog {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<Vec<AnchorLogEntry>, QueueError> {
        match self.store.get(LOG_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, entries: &[AnchorLogEntry]) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(entries)?;
        self.store.set(LOG_KEY, bytes).await
    }

    /// Every row, oldest first (used by reporting integrations and tests)
    pub async fn entries(&self) -> Result<Vec<AnchorLogEntry>, QueueError> {
        self.load().await
    }
}

#[async_trait]
impl AnchorLog for KvAnchorLog {
    async fn append(&self, entry: AnchorLogEntry) -> Result<(), QueueError> {
        let mut entries = self.load().await?;
        entries.push(entry);
        self.persist(&entries).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|entry| entry.timestamp >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await?;
            tracing::info!(removed, "pruned anchor log");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryStore;
    use chrono::Duration;

    fn log() -> KvAnchorLog {
        KvAnchorLog::new(Arc::new(MemoryStore::new()))
    }

    fn entry(status: LogStatus) -> AnchorLogEntry {
        AnchorLogEntry::new(Uuid::new_v4(), 1, ProviderKey::Github, status)
    }

    #[tokio::test]
    async fn test_append_keeps_every_attempt() {
        let log = log();
        let job_id = Uuid::new_v4();
        log.append(
            AnchorLogEntry::new(job_id, 1, ProviderKey::Tsa, LogStatus::Retry)
                .with_error("timeout"),
        )
        .await
        .unwrap();
        log.append(
            AnchorLogEntry::new(job_id, 2, ProviderKey::Tsa, LogStatus::Anchored)
                .with_url(Some("https://example.com/a".to_string())),
        )
        .await
        .unwrap();

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, LogStatus::Retry);
        assert_eq!(entries[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_prune_before_cutoff() {
        let log = log();
        let mut old = entry(LogStatus::Failed);
        old.timestamp = Utc::now() - Duration::days(120);
        log.append(old).await.unwrap();
        log.append(entry(LogStatus::Anchored)).await.unwrap();

        let removed = log.prune_before(Utc::now() - Duration::days(90)).await.unwrap();
        assert_eq!(removed, 1);
        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LogStatus::Anchored);
    }

    #[tokio::test]
    async fn test_prune_noop_when_nothing_old() {
        let log = log();
        log.append(entry(LogStatus::Retry)).await.unwrap();
        let removed = log.prune_before(Utc::now() - Duration::days(1)).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_status_display_matches_wire() {
        assert_eq!(LogStatus::Anchored.to_string(), "anchored");
        assert_eq!(LogStatus::Retry.to_string(), "retry");
        assert_eq!(LogStatus::Failed.to_string(), "failed");
        assert_eq!(
            serde_json::to_string(&LogStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let entry = entry(LogStatus::Anchored)
            .with_url(Some("https://example.com".to_string()))
            .with_http_status(Some(201));
        let json = serde_json::to_string(&entry).unwrap();
        let back: AnchorLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
