//! Storage backends for admission state.
//!
//! [`StateStore`] is what the pipeline talks to. It forwards every operation
//! to a [`RemoteStore`] (Redis in production) and answers from a
//! [`LocalStore`] whenever the remote one fails, times out, or is known to
//! be down.

use std::future::Future;
use std::time::Duration;

mod failover;
pub mod memory;
pub mod redis;
mod redis_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use failover::StateStore;
pub use memory::LocalStore;
pub use redis::RedisStore;

/// A shared key-value store with expiring entries.
///
/// Implementations report failures instead of recovering from them;
/// recovery is the job of [`StateStore`].
pub trait RemoteStore: Send + Sync + 'static {
    /// Read a value. Expired entries are absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Write a value, expiring after `ttl` when given.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Atomically increment a counter that resets `window` after its first increment.
    fn increment(&self, key: &str, window: Duration) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// The store's own clock, in milliseconds since the Unix epoch.
    fn now_ms(&self) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Could not obtain a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command was sent but failed.
    #[error("Query error: {0}")]
    Query(String),

    /// The backend did not answer in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend is known to be down and was not contacted.
    #[error("Storage unavailable")]
    Unavailable,
}
