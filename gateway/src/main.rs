use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use axum::{Router, routing::any};
use clap::Parser;
use config::Config;
use server::ServeConfig;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config()?;

    logger::init(&args)?;

    let _telemetry = telemetry::init(&config.telemetry)?;

    if let Err(e) = server::serve(serve_config(&args, config)).await {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 4000)));

    ServeConfig {
        listen_address,
        config,
        upstream: upstream(),
    }
}

/// Stand-in for the proxied services: every admitted request gets `200 OK`.
fn upstream() -> Router {
    Router::new()
        .route("/", any(|| async { "OK" }))
        .route("/{*path}", any(|| async { "OK" }))
}
