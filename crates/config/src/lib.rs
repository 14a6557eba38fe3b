//! Gateway configuration structures to map the gateway.toml configuration.

#![deny(missing_docs)]

mod admission;
mod identity;
mod loader;
mod telemetry;

use std::{borrow::Cow, net::SocketAddr, path::Path, path::PathBuf};

pub use admission::*;
pub use identity::IdentityConfig;
use serde::Deserialize;
pub use telemetry::{BatchExportConfig, ExportersConfig, OtlpExporterConfig, OtlpProtocol, TelemetryConfig};

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission control (rate limiting and blocking) settings.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Client identity resolution settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Metrics export settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the admission settings, returning non-fatal warnings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate_admission(&self.admission)
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// TLS configuration for secure connections.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerConfig {
    /// Path to the TLS certificate PEM file.
    pub certificate: PathBuf,
    /// Path to the TLS private key PEM file.
    pub key: PathBuf,
}

/// Health endpoint configuration.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is enabled.
    pub enabled: bool,
    /// The socket address the health endpoint should listen on.
    pub listen: Option<SocketAddr>,
    /// The path for the health endpoint.
    pub path: Cow<'static, str>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            listen: None,
            path: Cow::Borrowed("/health"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;
    use insta::assert_debug_snapshot;

    use crate::{Config, StorageConfig};

    #[test]
    fn server_values() {
        let config = indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8080"

            [server.health]
            enabled = false
            listen = "127.0.0.1:9090"
            path = "/ping"
        "#};

        let config: Config = toml::from_str(config).unwrap();

        assert_debug_snapshot!(&config.server, @r#"
        ServerConfig {
            listen_address: Some(
                127.0.0.1:8080,
            ),
            tls: None,
            health: HealthConfig {
                enabled: false,
                listen: Some(
                    127.0.0.1:9090,
                ),
                path: "/ping",
            },
        }
        "#);
    }

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.admission.enabled);
        assert_eq!(config.admission.global_limit, 5000);
        assert_eq!(config.admission.bucket_ttl, Duration::from_secs(3600));
        assert!(matches!(config.admission.storage, StorageConfig::Memory));
        assert!(config.admission.allow_list.is_empty());
        assert!(config.admission.deny_list.is_empty());
        assert_eq!(config.admission.default_policy.capacity, 20);

        let prefixes: Vec<_> = config
            .admission
            .policies
            .iter()
            .map(|(name, policy)| (name.as_str(), policy.path_prefix.as_str(), policy.capacity))
            .collect();

        assert_eq!(prefixes, vec![("auth", "/auth", 10), ("clip", "/clip", 50)]);

        assert!(config.identity.jwt_secret.is_none());
        assert_eq!(config.identity.token_header, "token");
        assert_eq!(config.identity.principal_claim, "userId");
        assert!(config.server.health.enabled);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let config = indoc! {r#"
            [admission]
            global_limt = 10
        "#};

        assert!(toml::from_str::<Config>(config).is_err());
    }
}
