//! Admission control configuration structures.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;

/// Name reserved for the policy applied to requests matching no category.
pub const DEFAULT_CATEGORY: &str = "default";

/// Admission control configuration for the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Whether admission control is enabled.
    pub enabled: bool,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Maximum number of requests admitted per one-second window, across all clients.
    pub global_limit: u32,
    /// Time-to-live of stored token buckets.
    #[serde(deserialize_with = "deserialize_duration")]
    pub bucket_ttl: Duration,
    /// How long a block record outlives its block, so that an offense right
    /// after a block ends still escalates. Zero keeps records only while the block lasts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub offense_memory: Duration,
    /// Client keys that bypass every check.
    pub allow_list: BTreeSet<String>,
    /// Client keys that are always rejected.
    pub deny_list: BTreeSet<String>,
    /// Token bucket policies by category name.
    pub policies: BTreeMap<String, PolicyConfig>,
    /// Policy for requests matching no category.
    pub default_policy: QuotaConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let policies = [("auth", "/auth", 10), ("clip", "/clip", 50)]
            .into_iter()
            .map(|(name, prefix, capacity)| {
                let policy = PolicyConfig {
                    path_prefix: prefix.to_string(),
                    capacity,
                    refill_rate: None,
                };

                (name.to_string(), policy)
            })
            .collect();

        Self {
            enabled: true,
            storage: StorageConfig::default(),
            global_limit: 5000,
            bucket_ttl: Duration::from_secs(3600),
            offense_memory: Duration::ZERO,
            allow_list: BTreeSet::new(),
            deny_list: BTreeSet::new(),
            policies,
            default_policy: QuotaConfig::default(),
        }
    }
}

/// Token bucket policy for one request category.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Request paths starting with this prefix belong to the category.
    pub path_prefix: String,
    /// Bucket capacity in tokens.
    pub capacity: u32,
    /// Tokens added per second. Defaults to a full bucket per minute.
    pub refill_rate: Option<f64>,
}

impl PolicyConfig {
    /// The effective refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or_else(|| per_minute(self.capacity))
    }
}

/// Token bucket parameters without a path matcher, used for the default policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Bucket capacity in tokens.
    pub capacity: u32,
    /// Tokens added per second. Defaults to a full bucket per minute.
    pub refill_rate: Option<f64>,
}

impl QuotaConfig {
    /// The effective refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or_else(|| per_minute(self.capacity))
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_rate: None,
        }
    }
}

fn per_minute(capacity: u32) -> f64 {
    f64::from(capacity) / 60.0
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local storage only. Enforcement is per gateway instance.
    #[default]
    Memory,
    /// Shared Redis storage with a process-local fallback.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS), including credentials.
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all admission keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for a single Redis command, including waiting for a connection.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
    /// Connection timeout.
    #[serde(default = "default_connection_timeout", deserialize_with = "deserialize_duration")]
    pub connection_timeout: Duration,
    /// How often Redis is retried after it has been marked unavailable.
    #[serde(default = "default_recovery_interval", deserialize_with = "deserialize_duration")]
    pub recovery_interval: Duration,
}

fn default_key_prefix() -> String {
    "gateway:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_recovery_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
            recovery_interval: default_recovery_interval(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(2)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
