use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use novagen_relay::config::RelayConfig;
use novagen_relay::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "novagen_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = RelayConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        upstream = %config.upstream_ws_url,
        "Loaded relay configuration",
    );

    // --- App state ---
    let addr = SocketAddr::new(
        config.host.parse().context("invalid HOST address")?,
        config.port,
    );
    let state = AppState::new(config);
    let links = std::sync::Arc::clone(&state.links);

    // --- Start server ---
    let app = novagen_relay::build_router(state);
    tracing::info!(%addr, "Starting relay");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Upgraded connections outlive the HTTP server, so links are cancelled
    // as soon as the signal arrives.
    let shutdown_links = std::sync::Arc::clone(&links);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let link_count = shutdown_links.link_count().await;
            tracing::info!(link_count, "Closing relay links");
            shutdown_links.shutdown_all().await;
        })
        .await
        .context("server error")?;

    // --- Post-shutdown cleanup ---
    let link_count = links.link_count().await;
    tracing::info!(link_count, "Server stopped accepting connections");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
