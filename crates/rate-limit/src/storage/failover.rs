use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use config::StorageConfig;
use telemetry::{Counter, KeyValue};

use super::{LocalStore, RedisStore, RemoteStore, StorageError};
use crate::clock::Clock;

/// The store the admission pipeline talks to.
///
/// Every operation goes to the remote store first, bounded by a timeout.
/// On failure the same operation is answered by the process-local store and
/// the remote store is flagged unavailable. While flagged, at most one call
/// per recovery interval probes the remote store; everything else goes
/// straight to the local store. The first remote success clears the flag
/// and wipes the local store, so state accumulated during the outage never
/// resurfaces.
///
/// None of the operations fail.
pub struct StateStore<R = RedisStore> {
    remote: Option<R>,
    local: LocalStore,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    last_failure_ms: AtomicU64,
    timeout: Duration,
    recovery_interval: Duration,
    fallbacks: Counter<u64>,
}

impl StateStore<RedisStore> {
    /// Build the store described by the configuration.
    pub fn from_config(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Self::local_only(clock)),
            StorageConfig::Redis(redis) => {
                let remote = RedisStore::new(redis)?;

                log::debug!("Admission state is shared through Redis with prefix '{}'", redis.key_prefix);

                Ok(Self::with_remote(
                    remote,
                    clock,
                    redis.response_timeout,
                    redis.recovery_interval,
                ))
            }
        }
    }
}

impl<R: RemoteStore> StateStore<R> {
    /// A store with no remote backend. State is private to this process.
    pub fn local_only(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, clock, Duration::ZERO, Duration::ZERO)
    }

    /// A store backed by `remote`, falling back to local state on failure.
    pub fn with_remote(remote: R, clock: Arc<dyn Clock>, timeout: Duration, recovery_interval: Duration) -> Self {
        Self::new(Some(remote), clock, timeout, recovery_interval)
    }

    fn new(remote: Option<R>, clock: Arc<dyn Clock>, timeout: Duration, recovery_interval: Duration) -> Self {
        let fallbacks = telemetry::metrics::meter()
            .u64_counter(telemetry::metrics::STORE_FALLBACKS)
            .with_description("Store operations answered by the process-local fallback")
            .build();

        Self {
            remote,
            local: LocalStore::new(clock.clone()),
            clock,
            available: AtomicBool::new(true),
            last_failure_ms: AtomicU64::new(0),
            timeout,
            recovery_interval,
            fallbacks,
        }
    }

    /// Whether a remote store is configured.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether operations are currently served by the remote store.
    pub fn is_remote_available(&self) -> bool {
        self.remote.is_some() && self.available.load(Ordering::Acquire)
    }

    /// The process-local store.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Read a value. Expired entries are absent.
    pub async fn get(&self, key: &str) -> Option<String> {
        let remote = self.remote().map(|remote| remote.get(key));
        self.run("get", remote, |local| local.get(key)).await
    }

    /// Write a value, expiring after `ttl` when given.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let remote = self.remote().map(|remote| remote.set(key, value, ttl));
        self.run("set", remote, |local| local.set(key, value.to_string(), ttl))
            .await
    }

    /// Increment a counter that resets `window` after its first increment.
    pub async fn increment(&self, key: &str, window: Duration) -> u64 {
        let remote = self.remote().map(|remote| remote.increment(key, window));
        self.run("increment", remote, |local| local.increment(key, window))
            .await
    }

    /// Current time in epoch milliseconds, from whichever store answers.
    pub async fn now_ms(&self) -> u64 {
        let remote = self.remote().map(|remote| remote.now_ms());
        self.run("now", remote, |local| local.now_ms()).await
    }

    async fn run<T, F>(&self, operation: &'static str, remote: Option<F>, local: impl FnOnce(&LocalStore) -> T) -> T
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let Some(remote) = remote else {
            if self.remote.is_some() {
                self.fallbacks.add(1, &[KeyValue::new("operation", operation)]);
            }

            return local(&self.local);
        };

        let error = match tokio::time::timeout(self.timeout, remote).await {
            Ok(Ok(value)) => {
                self.mark_available();
                return value;
            }
            Ok(Err(error)) => error,
            Err(_) => StorageError::Timeout(self.timeout),
        };

        self.mark_unavailable(operation, &error);
        self.fallbacks.add(1, &[KeyValue::new("operation", operation)]);

        local(&self.local)
    }

    /// The remote store, if this call should try it.
    fn remote(&self) -> Option<&R> {
        let remote = self.remote.as_ref()?;

        if self.available.load(Ordering::Acquire) {
            return Some(remote);
        }

        let now = self.clock.now_ms();
        let last_failure = self.last_failure_ms.load(Ordering::Acquire);

        if now.saturating_sub(last_failure) < self.recovery_interval.as_millis() as u64 {
            return None;
        }

        // Only the caller that moves the failure mark gets to probe.
        self.last_failure_ms
            .compare_exchange(last_failure, now, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| remote)
    }

    fn mark_available(&self) {
        if !self.available.swap(true, Ordering::AcqRel) {
            let discarded = self.local.len();
            self.local.clear();

            log::info!("Shared state store is reachable again, discarded {discarded} local entries");
        }
    }

    fn mark_unavailable(&self, operation: &str, error: &StorageError) {
        self.last_failure_ms.store(self.clock.now_ms(), Ordering::Release);

        if self.available.swap(false, Ordering::AcqRel) {
            log::warn!("Shared state store failed during '{operation}', falling back to local state: {error}");
        } else {
            log::debug!("Shared state store still unavailable during '{operation}': {error}");
        }
    }
}
