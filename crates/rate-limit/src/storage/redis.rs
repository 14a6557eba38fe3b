//! Redis-backed shared state.

use std::sync::LazyLock;
use std::time::Duration;

use config::RedisConfig;
use redis::{RedisError, Script};

use super::redis_pool::{self, Pool};
use super::{RemoteStore, StorageError};

/// Increments a counter and starts its expiry window on the first increment only.
static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local count = redis.call('INCR', KEYS[1])
        if count == 1 then
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
        end
        return count
        "#,
    )
});

/// State store shared by every gateway instance pointing at the same Redis.
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    /// Create the store. No connection is made until the first command.
    pub fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<redis_pool::Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn query_error(e: RedisError) -> StorageError {
    StorageError::Query(e.to_string())
}

/// Redis rejects a PX of zero, so sub-millisecond TTLs are rounded up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection().await?;

        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<Option<String>>(&mut *conn)
            .await
            .map_err(query_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);

        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        cmd.query_async::<()>(&mut *conn).await.map_err(query_error)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError> {
        let mut conn = self.connection().await?;

        INCREMENT_SCRIPT
            .key(self.key(key))
            .arg(ttl_millis(window))
            .invoke_async::<u64>(&mut *conn)
            .await
            .map_err(query_error)
    }

    async fn now_ms(&self) -> Result<u64, StorageError> {
        let mut conn = self.connection().await?;

        let (secs, micros) = redis::cmd("TIME")
            .query_async::<(u64, u64)>(&mut *conn)
            .await
            .map_err(query_error)?;

        Ok(secs * 1000 + micros / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(3600)), 3_600_000);
    }

    #[tokio::test]
    async fn keys_are_prefixed() {
        let config = RedisConfig {
            key_prefix: "edge:".to_string(),
            ..RedisConfig::default()
        };

        let store = RedisStore::new(&config).unwrap();

        assert_eq!(store.key("block:10.0.0.1"), "edge:block:10.0.0.1");
    }

    #[tokio::test]
    async fn unreachable_server_reports_an_error() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            connection_timeout: Duration::from_millis(200),
            ..RedisConfig::default()
        };

        let store = RedisStore::new(&config).unwrap();

        assert!(store.get("anything").await.is_err());
    }
}
