use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Json, Router, extract::State, routing::get};
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;
use rate_limit::RateLimitManager;

#[derive(Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// Serving, with admission state where it is configured to live.
    Healthy,

    /// Serving, but the shared store is unreachable and admission state is process-local.
    Degraded,
}

/// What the health endpoint inspects. `None` when admission control is disabled.
pub(crate) type HealthContext = Option<Arc<RateLimitManager>>;

/// Handles health check requests. A degraded store still answers 200: the gateway keeps admitting requests.
pub(crate) async fn health(State(manager): State<HealthContext>) -> (StatusCode, Json<HealthState>) {
    let store = manager.as_ref().map(|manager| manager.store());

    let state = match store {
        Some(store) if store.has_remote() && !store.is_remote_available() => HealthState::Degraded,
        _ => HealthState::Healthy,
    };

    (StatusCode::OK, Json(state))
}

/// The health route alone, at the configured path.
pub(crate) fn router(path: &str, manager: HealthContext) -> Router {
    Router::new().route(path, get(health)).with_state(manager)
}

/// Binds the health check endpoint to its own address.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
    manager: HealthContext,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let path = &health_config.path;
    let app = router(path, manager).into_make_service();

    log::info!("Health check endpoint exposed at {scheme}://{addr}{path}");

    match tls_config {
        Some(tls) => {
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            axum_server::bind_rustls(addr, rustls_config)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
