//! anchor-relay library exports

pub mod anchor_log;
pub mod asn1;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod providers;
pub mod queue;
pub mod record;
pub mod signing;

// Re-exports
pub use anchor_log::{AnchorLog, AnchorLogEntry, KvAnchorLog, LogStatus};
pub use config::Config;
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{ProviderError, QueueError, RelayError, RelayResult};
pub use hooks::{AnchorHooks, PublishMetadata};
pub use providers::{active_providers, Provider, ProviderKey, PushOutcome};
pub use queue::{AnchorQueue, EnqueueOutcome};
pub use record::{AnchorRecord, ContentDigest, HashAlgorithm, IntegrityMode};
