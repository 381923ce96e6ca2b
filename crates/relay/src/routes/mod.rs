pub mod health;

use axum::routing::get;
use axum::Router;
use novagen_core::protocol::PROGRESS_ROUTE;

use crate::relay::ws_route;
use crate::state::AppState;

/// Progress channel routes.
///
/// ```text
/// GET /ws/progress/{job_id}    WebSocket relay to the execution service
/// ```
pub fn progress_routes() -> Router<AppState> {
    Router::new().route(PROGRESS_ROUTE, get(ws_route))
}
