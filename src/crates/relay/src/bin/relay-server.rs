//! Relay server binary
//!
//! Serves `/process`, `/stream`, `/health` and `/stats`, running queries
//! against the configured upstream.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use relay::api::{create_router, AppState};
use relay::upstream::OpenRouterUpstream;
use relay::RelayConfig;

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Streaming request relay server", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: $RELAY_CONFIG or ./relay.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let cli = Cli::parse();
    let mut config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let addr = config.socket_addr()?;

    let api_key = config.upstream.api_key().with_context(|| {
        format!("upstream API key not set, export {}", config.upstream.api_key_env)
    })?;
    let upstream = OpenRouterUpstream::new(&config.upstream, api_key)?.with_app_name("relay");

    if config.server.auth_token.is_none() {
        tracing::warn!("server.auth_token is not set, requests are not authenticated");
    }
    tracing::info!(
        model = %config.upstream.model,
        heartbeat_secs = config.sessions.heartbeat_interval_secs,
        timeout_multiplier = config.sessions.timeout_multiplier,
        "Configuration loaded"
    );

    let state = AppState::new(config, Arc::new(upstream));
    let maintenance = state.spawn_maintenance();
    let app = create_router(state);

    tracing::info!("Starting relay server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in maintenance {
        handle.abort();
    }
    tracing::info!("Relay server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down");
        }
    }
}
