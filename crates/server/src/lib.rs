//! Gateway server library.
//!
//! Wraps an upstream router with admission control and serves it, either for
//! the binary or for the integration tests.

#![deny(missing_docs)]

mod admission;
mod health;
mod identity;
mod metrics;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use rate_limit::RateLimitManager;
use tokio::net::TcpListener;

pub use admission::{AdmissionLayer, AdmissionService, Rejection};
pub use identity::{ClientKeyResolver, CustomClaims, PrincipalStore, StaticPrincipals, TokenPrincipals, client_address};
pub use metrics::{MetricsLayer, MetricsService};

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized gateway TOML configuration.
    pub config: Config,
    /// Routes requests are forwarded to once admitted.
    pub upstream: Router,
}

struct App {
    router: Router,
    manager: Option<Arc<RateLimitManager>>,
}

/// Wrap `upstream` with admission control, and add the health endpoint if it
/// shares the main listener.
pub fn router(config: &Config, upstream: Router) -> anyhow::Result<Router> {
    Ok(app(config, upstream)?.router)
}

fn app(config: &Config, upstream: Router) -> anyhow::Result<App> {
    let manager = if config.admission.enabled {
        let manager = RateLimitManager::new(&config.admission)?;

        log::debug!(
            "Admission control enabled with {} policy categories",
            manager.policies().categories().count()
        );

        Some(Arc::new(manager))
    } else {
        log::warn!("Admission control is disabled, every request is forwarded");
        None
    };

    let mut router = match &manager {
        Some(manager) => {
            let resolver = ClientKeyResolver::from_config(&config.identity)?;
            upstream.layer(AdmissionLayer::new(manager.clone(), resolver))
        }
        None => upstream,
    };

    // Health is added after admission so probes are never throttled.
    let health = &config.server.health;

    if health.enabled && health.listen.is_none() {
        router = router.merge(health::router(&health.path, manager.clone()));
    }

    Ok(App {
        router: router.layer(MetricsLayer),
        manager,
    })
}

/// Starts and runs the gateway with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        upstream,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let App { router, manager } = app(&config, upstream)?;

    if config.server.health.enabled
        && let Some(listen) = config.server.health.listen
    {
        let tls = config.server.tls.clone();
        let health = config.server.health.clone();

        tokio::spawn(async move {
            if let Err(e) = health::bind_health_endpoint(listen, tls, health, manager).await {
                log::error!("{e}");
            }
        });
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Gateway listening at https://{listen_address}");

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            log::info!("Gateway listening at http://{listen_address}");

            axum::serve(listener, service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
    }

    Ok(())
}
