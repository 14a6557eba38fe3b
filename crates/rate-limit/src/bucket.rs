//! Per client, per category token buckets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RateLimitError;
use crate::policy::Policy;
use crate::storage::{RemoteStore, StateStore};

/// Reset hint reported to clients, relative to the last refill.
const RESET_WINDOW_MS: u64 = 60_000;

/// Token state of one client in one category.
///
/// Tokens are fractional so that slow refill rates accumulate between
/// requests. Only whole tokens can be spent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Tokens currently in the bucket.
    pub tokens: f64,
    /// Time of the last refill, in epoch milliseconds.
    #[serde(rename = "lastRefill")]
    pub last_refill: u64,
}

impl Bucket {
    /// A full bucket, as seen on a client's first request.
    pub fn full(policy: &Policy, now_ms: u64) -> Self {
        Self {
            tokens: f64::from(policy.capacity()),
            last_refill: now_ms,
        }
    }

    /// Store key of the bucket for a client and category.
    pub fn key(client_key: &str, category: &str) -> String {
        format!("rate_limit:{client_key}:{category}")
    }

    /// Add the tokens accrued since the last refill, up to capacity.
    ///
    /// A clock that moved backwards adds nothing and leaves `last_refill` untouched.
    pub fn refill(&mut self, policy: &Policy, now_ms: u64) {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill) as f64 / 1000.0;
        let capacity = f64::from(policy.capacity());

        self.tokens = (self.tokens + elapsed_secs * policy.refill_rate()).clamp(0.0, capacity);
        self.last_refill = self.last_refill.max(now_ms);
    }

    /// Whole tokens available for spending.
    pub fn available(&self) -> u32 {
        self.tokens.floor() as u32
    }

    /// Spend one token if a whole one is available.
    pub fn try_consume(&mut self) -> bool {
        if self.available() == 0 {
            return false;
        }

        self.tokens -= 1.0;
        true
    }

    /// Approximate reset time for headers: one minute after the last refill.
    ///
    /// This is a landmark, not the moment the bucket will be full again.
    pub fn reset_at_ms(&self) -> u64 {
        self.last_refill + RESET_WINDOW_MS
    }

    fn decode(raw: &str, key: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(bucket) if bucket.tokens.is_finite() => Some(bucket),
            Ok(_) => {
                log::warn!("Ignoring bucket record '{key}' with a non-finite token count");
                None
            }
            Err(e) => {
                log::warn!("Ignoring corrupt bucket record '{key}': {e}");
                None
            }
        }
    }
}

/// Result of asking a bucket for one token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Consumption {
    /// A token was spent.
    Taken {
        /// Whole tokens left after this request.
        remaining: u32,
        /// Approximate reset time in epoch milliseconds.
        reset_at_ms: u64,
    },
    /// The bucket is empty. Nothing was written.
    Exhausted,
}

/// Load, refill and spend from the bucket of `client_key` under `policy`.
///
/// The read-modify-write is not atomic; concurrent requests of one client
/// may each see the same token and overshoot the capacity.
pub(crate) async fn consume<R: RemoteStore>(
    store: &StateStore<R>,
    client_key: &str,
    policy: &Policy,
    now_ms: u64,
    ttl: Duration,
) -> Result<Consumption, RateLimitError> {
    let key = Bucket::key(client_key, policy.category());

    let mut bucket = match store.get(&key).await.and_then(|raw| Bucket::decode(&raw, &key)) {
        Some(mut bucket) => {
            bucket.refill(policy, now_ms);
            bucket
        }
        None => Bucket::full(policy, now_ms),
    };

    if !bucket.try_consume() {
        return Ok(Consumption::Exhausted);
    }

    let encoded = serde_json::to_string(&bucket).map_err(|source| RateLimitError::Encode { kind: "bucket", source })?;
    store.set(&key, &encoded, Some(ttl)).await;

    Ok(Consumption::Taken {
        remaining: bucket.available(),
        reset_at_ms: bucket.reset_at_ms(),
    })
}
