//! Delivery dispatcher
//!
//! One `run_once` call processes the current due batch: for every due job,
//! every active provider with a due pending leg gets one push attempt.
//! Provider failures never escape a tick; they are folded into the leg
//! state and the delivery log. The batch lock taken by `get_due_jobs` is
//! held until the whole batch is finished.
//!
//! `run` wraps `run_once` in the background loop: a fixed dispatch
//! interval, a slower log-retention pass, and broadcast shutdown.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::anchor_log::{AnchorLog, AnchorLogEntry, LogStatus};
use crate::config::DispatchConfig;
use crate::error::{ProviderError, RelayError};
use crate::providers::{Provider, ProviderKey, PushOutcome};
use crate::queue::{AnchorQueue, LockToken};

/// Counters for one dispatch tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub jobs_seen: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed_permanent: usize,
}

/// Drives due jobs through the active provider set
pub struct Dispatcher {
    queue: Arc<AnchorQueue>,
    providers: Vec<Arc<dyn Provider>>,
    log: Arc<dyn AnchorLog>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<AnchorQueue>,
        providers: Vec<Arc<dyn Provider>>,
        log: Arc<dyn AnchorLog>,
    ) -> Self {
        Self {
            queue,
            providers,
            log,
        }
    }

    /// Process the current due batch once
    pub async fn run_once(&self) -> Result<DispatchSummary, RelayError> {
        let keys: Vec<ProviderKey> = self.providers.iter().map(|p| p.key()).collect();
        let (due, token) = self
            .queue
            .get_due_jobs(&keys)
            .await
            .map_err(RelayError::Queue)?;

        let result = self.process_batch(&due, &token).await;
        self.queue
            .release_lock(&token)
            .await
            .map_err(RelayError::Queue)?;
        result
    }

    async fn process_batch(
        &self,
        due: &[crate::queue::AnchorJob],
        token: &LockToken,
    ) -> Result<DispatchSummary, RelayError> {
        let mut summary = DispatchSummary {
            jobs_seen: due.len(),
            ..Default::default()
        };

        for job in due {
            for provider in &self.providers {
                let key = provider.key();

                // Re-read persisted state so this provider sees the effects
                // of earlier legs (including job removal) in this batch
                let Some(current) = self
                    .queue
                    .get_job(job.id)
                    .await
                    .map_err(RelayError::Queue)?
                else {
                    break;
                };
                let Some(leg) = current.leg(key) else {
                    continue;
                };
                if !leg.is_due(Utc::now()) {
                    continue;
                }

                let attempt = leg.attempts + 1;
                let record = current.record.for_provider(key);
                tracing::debug!(
                    job_id = %job.id,
                    provider = %key,
                    attempt,
                    "attempting anchor delivery"
                );

                match provider.push(&record).await {
                    Ok(PushOutcome::Anchored(success)) => {
                        self.queue
                            .mark_success(job.id, key, Some(token))
                            .await
                            .map_err(RelayError::Queue)?;
                        self.log
                            .append(
                                AnchorLogEntry::new(job.id, attempt, key, LogStatus::Anchored)
                                    .with_url(success.url),
                            )
                            .await
                            .map_err(RelayError::Queue)?;
                        summary.delivered += 1;
                    }
                    Ok(PushOutcome::Failed(failure)) => {
                        let rescheduled = self
                            .queue
                            .mark_failure(job.id, key, &failure.error, failure.retryable, Some(token))
                            .await
                            .map_err(RelayError::Queue)?;
                        let status = if rescheduled {
                            summary.rescheduled += 1;
                            LogStatus::Retry
                        } else {
                            summary.failed_permanent += 1;
                            LogStatus::Failed
                        };
                        self.log
                            .append(
                                AnchorLogEntry::new(job.id, attempt, key, status)
                                    .with_http_status(failure.http_status)
                                    .with_error(&failure.error),
                            )
                            .await
                            .map_err(RelayError::Queue)?;
                    }
                    Err(e) => {
                        // Local faults retry; missing settings never fix
                        // themselves mid-flight
                        let retryable = !matches!(e, ProviderError::NotConfigured(_));
                        let message = e.to_string();
                        tracing::error!(
                            job_id = %job.id,
                            provider = %key,
                            error = %message,
                            "provider fault during delivery"
                        );
                        let rescheduled = self
                            .queue
                            .mark_failure(job.id, key, &message, retryable, Some(token))
                            .await
                            .map_err(RelayError::Queue)?;
                        let status = if rescheduled {
                            summary.rescheduled += 1;
                            LogStatus::Retry
                        } else {
                            summary.failed_permanent += 1;
                            LogStatus::Failed
                        };
                        self.log
                            .append(
                                AnchorLogEntry::new(job.id, attempt, key, status)
                                    .with_error(&message),
                            )
                            .await
                            .map_err(RelayError::Queue)?;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Run dispatch and log-retention ticks until shutdown
    pub async fn run(
        &self,
        config: &DispatchConfig,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut dispatch_tick = interval(Duration::from_secs(config.interval_secs));
        let mut prune_tick = interval(Duration::from_secs(config.prune_interval_secs));

        loop {
            tokio::select! {
                _ = dispatch_tick.tick() => {
                    match self.run_once().await {
                        Ok(summary) if summary.jobs_seen > 0 => {
                            tracing::info!(
                                jobs = summary.jobs_seen,
                                delivered = summary.delivered,
                                rescheduled = summary.rescheduled,
                                failed = summary.failed_permanent,
                                "dispatch tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "dispatch tick failed");
                        }
                    }
                }
                _ = prune_tick.tick() => {
                    let cutoff = Utc::now() - chrono::Duration::days(config.log_retention_days);
                    if let Err(e) = self.log.prune_before(cutoff).await {
                        tracing::error!(error = %e, "log retention pass failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }
            }
        }
    }
}
