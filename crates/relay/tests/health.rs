//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{body_json, closed_addr, get, spawn_http_upstream, test_config};
use novagen_relay::state::AppState;

// ---------------------------------------------------------------------------
// Test: GET /health reports ok when the upstream answers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let upstream = spawn_http_upstream(StatusCode::OK).await;
    let app = novagen_relay::build_router(AppState::new(test_config(upstream)));

    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["upstream_healthy"], true);
    assert_eq!(json["active_links"], 0);
}

// ---------------------------------------------------------------------------
// Test: an unhealthy upstream degrades the status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_degraded_when_upstream_fails() {
    let upstream = spawn_http_upstream(StatusCode::SERVICE_UNAVAILABLE).await;
    let app = novagen_relay::build_router(AppState::new(test_config(upstream)));

    let json = body_json(get(app, "/health").await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["upstream_healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: an unreachable upstream degrades the status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_degraded_when_upstream_unreachable() {
    let app = novagen_relay::build_router(AppState::new(test_config(closed_addr())));

    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["upstream_healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = novagen_relay::build_router(AppState::new(test_config(closed_addr())));

    let response = get(app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = novagen_relay::build_router(AppState::new(test_config(closed_addr())));

    let response = get(app, "/health").await;
    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}
