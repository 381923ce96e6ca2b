use std::sync::Arc;

use crate::config::RelayConfig;
use crate::links::LinkManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    /// Live relay links (one per downstream connection).
    pub links: Arc<LinkManager>,
    /// HTTP client for upstream health probes.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            links: Arc::new(LinkManager::new()),
            http: reqwest::Client::new(),
        }
    }
}
