//! Persistent anchor job queue
//!
//! A size-bounded, lock-protected map of delivery jobs, each carrying one
//! anchor record and a per-provider leg map with backoff scheduling. The
//! blob lives behind the `KvStore` port; mutual exclusion comes from a
//! short-TTL fail-open lock built on the same port.

pub mod core;
pub mod job;
pub mod lock;
pub mod store;

pub use self::core::{AnchorQueue, EnqueueOutcome};
pub use job::{
    backoff_delay, AnchorJob, DeliveryState, LegStatus, ProviderLegState, BASE_DELAY_SECS,
    MAX_DELAY_SECS, MAX_RETRIES,
};
pub use lock::{LockToken, QueueLock};
pub use store::{FileStore, KvStore, MemoryStore};
