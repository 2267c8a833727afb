//! Anchor job records and per-provider leg state

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::providers::ProviderKey;
use crate::record::AnchorRecord;

/// A leg is abandoned after this many failed attempts
pub const MAX_RETRIES: u32 = 5;

/// First-retry delay; doubles per attempt (1, 2, 4, 8, 16 minutes)
pub const BASE_DELAY_SECS: i64 = 60;

/// Backoff cap: one day
pub const MAX_DELAY_SECS: i64 = 86_400;

/// Delivery status of one provider leg
///
/// Terminal states are sticky: once a leg leaves `Pending` it never
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Pending,
    Done,
    FailedPermanent,
}

impl LegStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegStatus::Pending)
    }
}

/// Per (job, provider) delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLegState {
    pub status: LegStatus,
    pub attempts: u32,
    pub next_attempt: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
}

impl ProviderLegState {
    /// A fresh leg, immediately eligible for its first attempt
    pub fn new_eligible() -> Self {
        Self {
            status: LegStatus::Pending,
            attempts: 0,
            next_attempt: Utc.timestamp_opt(0, 0).unwrap(),
            last_error: None,
        }
    }

    /// A leg carrying over progress from a legacy single-leg job
    pub fn inherited(attempts: u32, next_attempt: DateTime<Utc>) -> Self {
        Self {
            status: LegStatus::Pending,
            attempts,
            next_attempt,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == LegStatus::Pending && self.next_attempt <= now
    }
}

/// Backoff delay before the next attempt
///
/// `attempts` is the count after the failure being scheduled, so attempt 1
/// waits 60s, attempt 2 waits 120s, and so on, capped at one day.
pub fn backoff_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    let secs = BASE_DELAY_SECS
        .saturating_mul(1i64 << exponent)
        .min(MAX_DELAY_SECS);
    Duration::seconds(secs)
}

/// Per-provider delivery state of a job
///
/// Jobs created before multi-provider support carry only job-level counters;
/// they are promoted to `MultiLeg` lazily on first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryState {
    MultiLeg {
        legs: BTreeMap<ProviderKey, ProviderLegState>,
    },
    LegacySingleLeg {
        attempts: u32,
        next_attempt: DateTime<Utc>,
    },
}

/// One queued anchor delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorJob {
    pub id: Uuid,
    pub record: AnchorRecord,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub delivery: DeliveryState,
}

impl AnchorJob {
    /// Create a job with one eligible leg per active provider
    pub fn new(record: AnchorRecord, active: &[ProviderKey]) -> Self {
        let legs = active
            .iter()
            .map(|&key| (key, ProviderLegState::new_eligible()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            record,
            created_at: Utc::now(),
            delivery: DeliveryState::MultiLeg { legs },
        }
    }

    /// Build a pre-multi-provider job (used by upgrade tests and when
    /// deserializing old queue blobs)
    pub fn legacy(record: AnchorRecord, attempts: u32, next_attempt: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            created_at: Utc::now(),
            delivery: DeliveryState::LegacySingleLeg {
                attempts,
                next_attempt,
            },
        }
    }

    /// Promote a legacy job to the current active-provider set
    ///
    /// Accumulated attempts and schedule seed every new leg so backoff
    /// progress survives the upgrade. Returns true if the job changed.
    pub fn upgrade_legs(&mut self, active: &[ProviderKey]) -> bool {
        let (attempts, next_attempt) = match self.delivery {
            DeliveryState::LegacySingleLeg {
                attempts,
                next_attempt,
            } => (attempts, next_attempt),
            DeliveryState::MultiLeg { .. } => return false,
        };
        let legs = active
            .iter()
            .map(|&key| (key, ProviderLegState::inherited(attempts, next_attempt)))
            .collect();
        self.delivery = DeliveryState::MultiLeg { legs };
        true
    }

    pub fn legs(&self) -> Option<&BTreeMap<ProviderKey, ProviderLegState>> {
        match &self.delivery {
            DeliveryState::MultiLeg { legs } => Some(legs),
            DeliveryState::LegacySingleLeg { .. } => None,
        }
    }

    pub fn legs_mut(&mut self) -> Option<&mut BTreeMap<ProviderKey, ProviderLegState>> {
        match &mut self.delivery {
            DeliveryState::MultiLeg { legs } => Some(legs),
            DeliveryState::LegacySingleLeg { .. } => None,
        }
    }

    pub fn leg(&self, key: ProviderKey) -> Option<&ProviderLegState> {
        self.legs().and_then(|legs| legs.get(&key))
    }

    /// All legs terminal (an empty leg map counts as terminal)
    ///
    /// Legacy jobs are never terminal; they must be upgraded first.
    pub fn is_terminal(&self) -> bool {
        match self.legs() {
            Some(legs) => legs.values().all(|leg| leg.status.is_terminal()),
            None => false,
        }
    }

    /// At least one leg is pending and due
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.delivery {
            DeliveryState::MultiLeg { legs } => legs.values().any(|leg| leg.is_due(now)),
            DeliveryState::LegacySingleLeg { next_attempt, .. } => *next_attempt <= now,
        }
    }

    /// At least one leg is still pending
    pub fn has_pending_leg(&self) -> bool {
        match &self.delivery {
            DeliveryState::MultiLeg { legs } => {
                legs.values().any(|leg| leg.status == LegStatus::Pending)
            }
            DeliveryState::LegacySingleLeg { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContentDigest, HashAlgorithm, IntegrityMode};

    fn record() -> AnchorRecord {
        AnchorRecord::new(
            "post:1",
            ContentDigest {
                hash: "cd".repeat(32),
                algorithm: HashAlgorithm::Sha256,
                mode: IntegrityMode::Plain,
            },
        )
    }

    #[test]
    fn test_new_job_legs_are_immediately_eligible() {
        let job = AnchorJob::new(record(), &[ProviderKey::Github, ProviderKey::Tsa]);
        let legs = job.legs().unwrap();
        assert_eq!(legs.len(), 2);
        for leg in legs.values() {
            assert_eq!(leg.status, LegStatus::Pending);
            assert_eq!(leg.attempts, 0);
            assert!(leg.is_due(Utc::now()));
        }
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1).num_seconds(), 60);
        assert_eq!(backoff_delay(2).num_seconds(), 120);
        assert_eq!(backoff_delay(3).num_seconds(), 240);
        assert_eq!(backoff_delay(4).num_seconds(), 480);
        assert_eq!(backoff_delay(5).num_seconds(), 960);
    }

    #[test]
    fn test_backoff_caps_at_one_day() {
        assert_eq!(backoff_delay(12).num_seconds(), MAX_DELAY_SECS);
        assert_eq!(backoff_delay(u32::MAX).num_seconds(), MAX_DELAY_SECS);
    }

    #[test]
    fn test_leg_status_terminality() {
        assert!(!LegStatus::Pending.is_terminal());
        assert!(LegStatus::Done.is_terminal());
        assert!(LegStatus::FailedPermanent.is_terminal());
    }

    #[test]
    fn test_empty_leg_map_is_terminal() {
        let job = AnchorJob::new(record(), &[]);
        assert!(job.is_terminal());
        assert!(!job.has_pending_leg());
    }

    #[test]
    fn test_legacy_job_upgrade_inherits_progress() {
        let next = Utc::now() + Duration::seconds(120);
        let mut job = AnchorJob::legacy(record(), 3, next);
        assert!(!job.is_terminal());
        assert!(job.legs().is_none());

        assert!(job.upgrade_legs(&[ProviderKey::Github, ProviderKey::Rekor]));
        let legs = job.legs().unwrap();
        assert_eq!(legs.len(), 2);
        for leg in legs.values() {
            assert_eq!(leg.attempts, 3);
            assert_eq!(leg.next_attempt, next);
        }
        // Second upgrade is a no-op
        assert!(!job.upgrade_legs(&[ProviderKey::Tsa]));
    }

    #[test]
    fn test_job_due_when_any_leg_due() {
        let mut job = AnchorJob::new(record(), &[ProviderKey::Github, ProviderKey::Gitlab]);
        let future = Utc::now() + Duration::hours(1);
        job.legs_mut()
            .unwrap()
            .get_mut(&ProviderKey::Github)
            .unwrap()
            .next_attempt = future;

        assert!(job.is_due(Utc::now()));
        job.legs_mut()
            .unwrap()
            .get_mut(&ProviderKey::Gitlab)
            .unwrap()
            .next_attempt = future;
        assert!(!job.is_due(Utc::now()));
    }

    #[test]
    fn test_job_serde_roundtrip_multi_leg() {
        let job = AnchorJob::new(record(), &[ProviderKey::Tsa]);
        let json = serde_json::to_string(&job).unwrap();
        let back: AnchorJob = serde_json::from_str(&json).unwrap();
        assert_eq!(job, back);
        assert!(json.contains("\"legs\""));
    }

    #[test]
    fn test_job_serde_roundtrip_legacy() {
        let job = AnchorJob::legacy(record(), 2, Utc::now());
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("\"legs\""));
        let back: AnchorJob = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.delivery,
            DeliveryState::LegacySingleLeg { attempts: 2, .. }
        ));
    }
}
