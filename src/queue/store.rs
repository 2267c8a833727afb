//! Key-value persistence port
//!
//! The queue blob, the anchor log, and the mutual-exclusion lock all live
//! behind this port. The host platform supplies the real backend; this
//! module ships an in-process `MemoryStore` for tests and a `FileStore`
//! for the standalone binary. `set_if_absent` is the atomic
//! "create if absent with TTL" primitive the queue lock is built on.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::QueueError;

/// Persistent key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, QueueError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), QueueError>;

    async fn delete(&self, key: &str) -> Result<(), QueueError>;

    /// Atomically create `key` if it is absent (or its TTL has lapsed)
    ///
    /// Returns true if this caller created the entry.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, QueueError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store for tests and embedded use
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, QueueError> {
        let entries = self.entries.lock().await;
        let now = Utc::now();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        if entries.get(key).is_some_and(|entry| !entry.expired(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }
}

/// On-disk envelope carrying the optional TTL
#[derive(Debug, Serialize, Deserialize)]
struct FileEnvelope {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    expires_at: Option<DateTime<Utc>>,
    value_b64: String,
}

/// One-file-per-key store for the standalone binary
///
/// `set_if_absent` relies on `create_new` for atomicity; a lapsed TTL is
/// reclaimed with a best-effort replace, which is the degree of exclusion
/// the fail-open lock needs.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn encode(value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<Vec<u8>, QueueError> {
        use base64::Engine;
        let envelope = FileEnvelope {
            expires_at,
            value_b64: base64::engine::general_purpose::STANDARD.encode(value),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(bytes: &[u8]) -> Result<(Vec<u8>, Option<DateTime<Utc>>), QueueError> {
        use base64::Engine;
        let envelope: FileEnvelope = serde_json::from_slice(bytes)?;
        let value = base64::engine::general_purpose::STANDARD
            .decode(envelope.value_b64.as_bytes())
            .map_err(|e| QueueError::Store(format!("corrupt envelope: {e}")))?;
        Ok((value, envelope.expires_at))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, QueueError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let (value, expires_at) = Self::decode(&bytes)?;
                if expires_at.is_some_and(|at| at <= Utc::now()) {
                    return Ok(None);
                }
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), QueueError> {
        let bytes = Self::encode(&value, None)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        use tokio::io::AsyncWriteExt;

        let path = self.path_for(key);
        let bytes = Self::encode(&value, Some(Utc::now() + ttl))?;

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&bytes).await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = tokio::fs::read(&path).await?;
                let (_, expires_at) = Self::decode(&existing)?;
                if expires_at.is_some_and(|at| at <= Utc::now()) {
                    tokio::fs::write(&path, bytes).await?;
                    return Ok(true);
                }
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
