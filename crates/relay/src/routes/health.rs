use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the execution service answered its health probe.
    pub upstream_healthy: bool,
    /// Relay links currently open.
    pub active_links: usize,
}

/// GET /health -- returns relay and upstream health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let upstream_healthy = probe_upstream(&state).await;
    let active_links = state.links.link_count().await;

    let status = if upstream_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        upstream_healthy,
        active_links,
    })
}

/// `GET {upstream_http_url}/health` within the probe timeout.
async fn probe_upstream(state: &AppState) -> bool {
    let url = format!("{}/health", state.config.upstream_http_url);
    match state
        .http
        .get(&url)
        .timeout(state.config.health_probe_timeout)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Upstream health probe failed");
            false
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
