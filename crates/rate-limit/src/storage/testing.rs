//! A scriptable stand-in for Redis.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::{LocalStore, RemoteStore, StorageError};
use crate::clock::Clock;

/// Remote store kept in memory that can be switched down, slowed down, or
/// given a skewed clock. Clones share state.
#[derive(Clone)]
pub(crate) struct FakeRemote {
    inner: Arc<Inner>,
}

struct Inner {
    store: LocalStore,
    down: AtomicBool,
    calls: AtomicUsize,
    delay_ms: AtomicU64,
    clock_offset_ms: AtomicU64,
}

impl FakeRemote {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: LocalStore::new(clock),
                down: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                delay_ms: AtomicU64::new(0),
                clock_offset_ms: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.inner.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.inner.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_clock_offset(&self, offset_ms: u64) {
        self.inner.clock_offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    /// Number of operations that reached this store, failed ones included.
    pub(crate) fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Direct access to the stored data, bypassing the failure switches.
    pub(crate) fn data(&self) -> &LocalStore {
        &self.inner.store
    }

    async fn enter(&self) -> Result<&LocalStore, StorageError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.delay_ms.load(Ordering::SeqCst);

        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.inner.down.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("connection refused".to_string()));
        }

        Ok(&self.inner.store)
    }
}

impl RemoteStore for FakeRemote {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.enter().await?.get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        self.enter().await?.set(key, value.to_string(), ttl);
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError> {
        Ok(self.enter().await?.increment(key, window))
    }

    async fn now_ms(&self) -> Result<u64, StorageError> {
        let store = self.enter().await?;
        Ok(store.now_ms() + self.inner.clock_offset_ms.load(Ordering::SeqCst))
    }
}
