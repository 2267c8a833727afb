//! The anchor job queue
//!
//! A bounded, insertion-ordered set of jobs persisted as one versioned
//! JSON blob behind the key-value port, guarded by the short-TTL queue
//! lock. Jobs leave the queue only when every provider leg is terminal.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::job::{backoff_delay, AnchorJob, LegStatus, MAX_RETRIES};
use super::lock::{LockToken, QueueLock};
use super::store::KvStore;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::providers::ProviderKey;
use crate::record::AnchorRecord;

const QUEUE_KEY: &str = "anchor_relay.queue";
const QUEUE_LOCK_KEY: &str = "anchor_relay.queue.lock";

/// Current queue blob version (v1 predates per-provider legs)
const BLOB_VERSION: u32 = 2;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueBlob {
    version: u32,
    jobs: Vec<AnchorJob>,
}

/// Result of an enqueue attempt
///
/// Back-pressure is applied by discarding new work, not by blocking or
/// erroring, so a full queue yields `Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(Uuid),
    Dropped,
}

/// Persistent anchor delivery queue
pub struct AnchorQueue {
    store: Arc<dyn KvStore>,
    lock: QueueLock,
    max_size: usize,
}

impl AnchorQueue {
    pub fn new(store: Arc<dyn KvStore>, config: &QueueConfig) -> Self {
        let lock = QueueLock::new(store.clone(), QUEUE_LOCK_KEY, config);
        Self {
            store,
            lock,
            max_size: config.max_size,
        }
    }

    async fn load(&self) -> Result<QueueBlob, QueueError> {
        match self.store.get(QUEUE_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(QueueBlob {
                version: BLOB_VERSION,
                jobs: Vec::new(),
            }),
        }
    }

    async fn persist(&self, blob: &mut QueueBlob) -> Result<(), QueueError> {
        blob.version = BLOB_VERSION;
        let bytes = serde_json::to_vec(blob)?;
        self.store.set(QUEUE_KEY, bytes).await
    }

    /// Add a job for `record` with one leg per active provider
    ///
    /// Silently drops the record when the queue is at capacity.
    pub async fn enqueue(
        &self,
        record: AnchorRecord,
        active: &[ProviderKey],
    ) -> Result<EnqueueOutcome, QueueError> {
        let token = self.lock.acquire().await?;
        let result = self.enqueue_locked(record, active).await;
        self.lock.release(&token).await?;
        result
    }

    async fn enqueue_locked(
        &self,
        record: AnchorRecord,
        active: &[ProviderKey],
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut blob = self.load().await?;
        if blob.jobs.len() >= self.max_size {
            tracing::warn!(
                queue_size = blob.jobs.len(),
                document_id = %record.document_id,
                "queue full, dropping anchor record"
            );
            return Ok(EnqueueOutcome::Dropped);
        }

        let job = AnchorJob::new(record, active);
        let id = job.id;
        tracing::debug!(job_id = %id, providers = active.len(), "anchor job queued");
        blob.jobs.push(job);
        self.persist(&mut blob).await?;
        Ok(EnqueueOutcome::Queued(id))
    }

    /// Load every due job and hand the caller the batch lock
    ///
    /// The lock is held across the caller's whole processing batch;
    /// releasing it via `release_lock` is the caller's responsibility.
    /// Legacy jobs are promoted to the active-provider set here, and jobs
    /// with no pending leg left (including empty leg maps) are removed.
    pub async fn get_due_jobs(
        &self,
        active: &[ProviderKey],
    ) -> Result<(Vec<AnchorJob>, LockToken), QueueError> {
        let token = self.lock.acquire().await?;
        let mut blob = self.load().await?;
        let now = Utc::now();
        let mut changed = false;

        for job in &mut blob.jobs {
            if job.upgrade_legs(active) {
                tracing::debug!(job_id = %job.id, "legacy job promoted to per-provider legs");
                changed = true;
            }
        }

        let before = blob.jobs.len();
        blob.jobs.retain(|job| {
            if job.has_pending_leg() {
                true
            } else {
                tracing::debug!(job_id = %job.id, "all legs terminal, removing job");
                false
            }
        });
        changed |= blob.jobs.len() != before;

        if changed {
            self.persist(&mut blob).await?;
        }

        let due: Vec<AnchorJob> = blob
            .jobs
            .iter()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();

        Ok((due, token))
    }

    /// Release the batch lock taken by `get_due_jobs`
    pub async fn release_lock(&self, token: &LockToken) -> Result<(), QueueError> {
        self.lock.release(token).await
    }

    /// Record a successful delivery on one leg
    ///
    /// Removes the job once every leg is terminal. A leg that already left
    /// `Pending` is never touched again.
    pub async fn mark_success(
        &self,
        job_id: Uuid,
        provider: ProviderKey,
        token: Option<&LockToken>,
    ) -> Result<(), QueueError> {
        match token {
            Some(_) => self.mark_success_locked(job_id, provider).await,
            None => {
                let token = self.lock.acquire().await?;
                let result = self.mark_success_locked(job_id, provider).await;
                self.lock.release(&token).await?;
                result
            }
        }
    }

    async fn mark_success_locked(
        &self,
        job_id: Uuid,
        provider: ProviderKey,
    ) -> Result<(), QueueError> {
        let mut blob = self.load().await?;
        let Some(job) = blob.jobs.iter_mut().find(|job| job.id == job_id) else {
            return Ok(());
        };
        if let Some(leg) = job.legs_mut().and_then(|legs| legs.get_mut(&provider)) {
            if leg.status != LegStatus::Pending {
                tracing::debug!(job_id = %job_id, provider = %provider, "leg already terminal, ignoring success");
            } else {
                leg.status = LegStatus::Done;
                leg.last_error = None;
                tracing::info!(job_id = %job_id, provider = %provider, "anchor delivered");
            }
        }
        let done = job.is_terminal();
        if done {
            blob.jobs.retain(|job| job.id != job_id);
        }
        self.persist(&mut blob).await
    }

    /// Record a failed delivery on one leg
    ///
    /// Returns true if the leg was rescheduled for another attempt, false
    /// if it is now permanently failed (for caller-side alerting).
    pub async fn mark_failure(
        &self,
        job_id: Uuid,
        provider: ProviderKey,
        error: &str,
        retryable: bool,
        token: Option<&LockToken>,
    ) -> Result<bool, QueueError> {
        match token {
            Some(_) => self.mark_failure_locked(job_id, provider, error, retryable).await,
            None => {
                let token = self.lock.acquire().await?;
                let result = self
                    .mark_failure_locked(job_id, provider, error, retryable)
                    .await;
                self.lock.release(&token).await?;
                result
            }
        }
    }

    async fn mark_failure_locked(
        &self,
        job_id: Uuid,
        provider: ProviderKey,
        error: &str,
        retryable: bool,
    ) -> Result<bool, QueueError> {
        let mut blob = self.load().await?;
        let Some(job) = blob.jobs.iter_mut().find(|job| job.id == job_id) else {
            return Ok(false);
        };

        let mut rescheduled = false;
        if let Some(leg) = job.legs_mut().and_then(|legs| legs.get_mut(&provider)) {
            if leg.status != LegStatus::Pending {
                tracing::debug!(job_id = %job_id, provider = %provider, "leg already terminal, ignoring failure");
            } else {
                leg.attempts += 1;
                leg.last_error = Some(error.to_string());
                if !retryable || leg.attempts >= MAX_RETRIES {
                    leg.status = LegStatus::FailedPermanent;
                    tracing::warn!(
                        job_id = %job_id,
                        provider = %provider,
                        attempts = leg.attempts,
                        error = %error,
                        "anchor leg permanently failed"
                    );
                } else {
                    leg.next_attempt = Utc::now() + backoff_delay(leg.attempts);
                    rescheduled = true;
                    tracing::info!(
                        job_id = %job_id,
                        provider = %provider,
                        attempts = leg.attempts,
                        next_attempt = %leg.next_attempt,
                        "anchor leg rescheduled"
                    );
                }
            }
        }

        if job.is_terminal() {
            blob.jobs.retain(|job| job.id != job_id);
        }
        self.persist(&mut blob).await?;
        Ok(rescheduled)
    }

    /// Look up one job by id
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<AnchorJob>, QueueError> {
        let blob = self.load().await?;
        Ok(blob.jobs.into_iter().find(|job| job.id == job_id))
    }

    /// Number of jobs currently queued
    pub async fn count(&self) -> Result<usize, QueueError> {
        Ok(self.load().await?.jobs.len())
    }

    /// Drop every queued job
    pub async fn clear(&self) -> Result<(), QueueError> {
        let token = self.lock.acquire().await?;
        let result = self
            .persist(&mut QueueBlob {
                version: BLOB_VERSION,
                jobs: Vec::new(),
            })
            .await;
        self.lock.release(&token).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::queue::store::MemoryStore;
    use crate::record::{ContentDigest, HashAlgorithm, IntegrityMode};

    fn record() -> AnchorRecord {
        AnchorRecord::new(
            "post:7",
            ContentDigest {
                hash: "ef".repeat(32),
                algorithm: HashAlgorithm::Sha256,
                mode: IntegrityMode::Plain,
            },
        )
    }

    fn queue() -> AnchorQueue {
        let config = QueueConfig {
            lock_retry_ms: 1,
            ..Default::default()
        };
        AnchorQueue::new(Arc::new(MemoryStore::new()), &config)
    }

    fn small_queue(max_size: usize) -> AnchorQueue {
        let config = QueueConfig {
            max_size,
            lock_retry_ms: 1,
            ..Default::default()
        };
        AnchorQueue::new(Arc::new(MemoryStore::new()), &config)
    }

    const BOTH: &[ProviderKey] = &[ProviderKey::Github, ProviderKey::Tsa];

    #[tokio::test]
    async fn test_enqueue_and_count() {
        let queue = queue();
        let outcome = queue.enqueue(record(), BOTH).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Queued(_)));
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_beyond_cap_is_silent_drop() {
        let queue = small_queue(2);
        for _ in 0..2 {
            assert!(matches!(
                queue.enqueue(record(), BOTH).await.unwrap(),
                EnqueueOutcome::Queued(_)
            ));
        }
        assert_eq!(
            queue.enqueue(record(), BOTH).await.unwrap(),
            EnqueueOutcome::Dropped
        );
        assert_eq!(queue.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_due_jobs_and_batch_lock() {
        let queue = queue();
        queue.enqueue(record(), BOTH).await.unwrap();

        let (due, token) = queue.get_due_jobs(BOTH).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(token.is_held());
        queue.release_lock(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_job_removed_when_all_legs_terminal() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) = queue.enqueue(record(), BOTH).await.unwrap() else {
            panic!("expected queued");
        };

        queue
            .mark_success(id, ProviderKey::Github, None)
            .await
            .unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);

        let rescheduled = queue
            .mark_failure(id, ProviderKey::Tsa, "403 forbidden", false, None)
            .await
            .unwrap();
        assert!(!rescheduled);
        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(queue.get_job(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backoff_schedule_is_deterministic() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) =
            queue.enqueue(record(), &[ProviderKey::Tsa]).await.unwrap()
        else {
            panic!("expected queued");
        };

        let expected = [60i64, 120, 240, 480];
        for (attempt, &offset) in expected.iter().enumerate() {
            let before = Utc::now();
            let rescheduled = queue
                .mark_failure(id, ProviderKey::Tsa, "timeout", true, None)
                .await
                .unwrap();
            assert!(rescheduled, "attempt {} should reschedule", attempt + 1);

            let job = queue.get_job(id).await.unwrap().unwrap();
            let leg = job.leg(ProviderKey::Tsa).unwrap();
            assert_eq!(leg.attempts as usize, attempt + 1);
            let delta = (leg.next_attempt - before).num_seconds();
            assert!(
                (offset..offset + 2).contains(&delta),
                "attempt {}: expected ~{}s, got {}s",
                attempt + 1,
                offset,
                delta
            );
        }

        // Fifth failure exhausts MAX_RETRIES regardless of retryability
        let rescheduled = queue
            .mark_failure(id, ProviderKey::Tsa, "timeout", true, None)
            .await
            .unwrap();
        assert!(!rescheduled);
        assert_eq!(queue.get_job(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_immediately_permanent() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) =
            queue.enqueue(record(), &[ProviderKey::Rekor]).await.unwrap()
        else {
            panic!("expected queued");
        };

        let rescheduled = queue
            .mark_failure(id, ProviderKey::Rekor, "422 unprocessable", false, None)
            .await
            .unwrap();
        assert!(!rescheduled);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminal_leg_is_monotonic() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) = queue.enqueue(record(), BOTH).await.unwrap() else {
            panic!("expected queued");
        };
        queue
            .mark_success(id, ProviderKey::Github, None)
            .await
            .unwrap();

        // Any mix of further marks against a done leg is a no-op
        for round in 0..8 {
            if round % 3 == 0 {
                queue
                    .mark_success(id, ProviderKey::Github, None)
                    .await
                    .unwrap();
            } else {
                let rescheduled = queue
                    .mark_failure(id, ProviderKey::Github, "late error", round % 2 == 0, None)
                    .await
                    .unwrap();
                assert!(!rescheduled);
            }
            let job = queue.get_job(id).await.unwrap().unwrap();
            let leg = job.leg(ProviderKey::Github).unwrap();
            assert_eq!(leg.status, LegStatus::Done);
            assert_eq!(leg.attempts, 0);
        }
    }

    #[tokio::test]
    async fn test_failed_permanent_leg_is_monotonic() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) = queue.enqueue(record(), BOTH).await.unwrap() else {
            panic!("expected queued");
        };
        queue
            .mark_failure(id, ProviderKey::Github, "401 unauthorized", false, None)
            .await
            .unwrap();

        // The pending sibling keeps the job alive while late marks land
        for round in 0..8 {
            if round % 3 == 0 {
                queue
                    .mark_success(id, ProviderKey::Github, None)
                    .await
                    .unwrap();
            } else {
                let rescheduled = queue
                    .mark_failure(id, ProviderKey::Github, "late error", round % 2 == 0, None)
                    .await
                    .unwrap();
                assert!(!rescheduled);
            }
            let job = queue.get_job(id).await.unwrap().unwrap();
            let leg = job.leg(ProviderKey::Github).unwrap();
            assert_eq!(leg.status, LegStatus::FailedPermanent);
            assert_eq!(leg.attempts, 1);
            assert_eq!(leg.last_error.as_deref(), Some("401 unauthorized"));
        }
        assert_eq!(
            queue
                .get_job(id)
                .await
                .unwrap()
                .unwrap()
                .leg(ProviderKey::Tsa)
                .unwrap()
                .status,
            LegStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_zero_provider_job_is_removed_without_marks() {
        let queue = queue();
        queue.enqueue(record(), &[]).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);

        let (due, token) = queue.get_due_jobs(&[]).await.unwrap();
        assert!(due.is_empty());
        queue.release_lock(&token).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_legacy_job_upgraded_on_read() {
        let config = QueueConfig {
            lock_retry_ms: 1,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let queue = AnchorQueue::new(store.clone(), &config);

        // Seed a v1 blob containing a legacy job with no leg map
        let legacy = AnchorJob::legacy(record(), 2, Utc.timestamp_opt(0, 0).unwrap());
        let id = legacy.id;
        let blob = serde_json::json!({ "version": 1, "jobs": [legacy] });
        store
            .set(QUEUE_KEY, serde_json::to_vec(&blob).unwrap())
            .await
            .unwrap();

        let (due, token) = queue.get_due_jobs(BOTH).await.unwrap();
        queue.release_lock(&token).await.unwrap();
        assert_eq!(due.len(), 1);

        let job = queue.get_job(id).await.unwrap().unwrap();
        let legs = job.legs().unwrap();
        assert_eq!(legs.len(), 2);
        for leg in legs.values() {
            assert_eq!(leg.attempts, 2);
        }
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let queue = queue();
        queue.enqueue(record(), BOTH).await.unwrap();
        queue.enqueue(record(), BOTH).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_jobs_not_due_are_not_returned() {
        let queue = queue();
        let EnqueueOutcome::Queued(id) =
            queue.enqueue(record(), &[ProviderKey::Tsa]).await.unwrap()
        else {
            panic!("expected queued");
        };
        queue
            .mark_failure(id, ProviderKey::Tsa, "timeout", true, None)
            .await
            .unwrap();

        // Leg now backs off 60s; it is pending but not due
        let (due, token) = queue.get_due_jobs(&[ProviderKey::Tsa]).await.unwrap();
        queue.release_lock(&token).await.unwrap();
        assert!(due.is_empty());
        assert_eq!(queue.count().await.unwrap(), 1);
    }
}
