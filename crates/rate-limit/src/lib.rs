//! Admission control for the gateway.
//!
//! Decides, per request, whether to forward, throttle or reject it:
//! - Allow and deny lists keyed by client
//! - Progressive blocking of clients that keep exhausting their quota
//! - A global per-second admission ceiling
//! - Per-client, per-category token buckets
//!
//! State lives in Redis when configured, with a process-local store taking
//! over transparently whenever Redis cannot answer in time.

#![deny(missing_docs)]

mod block;
mod bucket;
mod clock;
mod error;
mod global;
mod manager;
mod metrics;
mod policy;
mod request;
mod storage;
mod verdict;

pub use block::{BlockDuration, BlockRecord, BlockStatus, ESCALATION_SCHEDULE};
pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RateLimitError;
pub use manager::RateLimitManager;
pub use policy::{Policy, PolicyRegistry};
pub use request::RateLimitRequest;
pub use storage::{LocalStore, RedisStore, RemoteStore, StateStore, StorageError};
pub use verdict::{Denial, DenialReason, RateLimitHeaders, Verdict};
