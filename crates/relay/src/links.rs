use std::collections::HashMap;

use novagen_core::{JobId, Timestamp};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one live relay link.
pub struct RelayLink {
    pub job_id: JobId,
    /// Cancelled to tear the link down; both legs are then closed.
    pub cancel: CancellationToken,
    pub opened_at: Timestamp,
}

/// Tracks every active relay link so shutdown can close them all.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across handlers.
pub struct LinkManager {
    links: RwLock<HashMap<String, RelayLink>>,
    /// Parent of every link token; cancelled by `shutdown_all`.
    cancel: CancellationToken,
}

impl LinkManager {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a link for `job_id`.
    ///
    /// Returns the link id and the token the link task must watch. After
    /// [`shutdown_all`](Self::shutdown_all) the token is already cancelled.
    pub async fn add(&self, job_id: JobId) -> (String, CancellationToken) {
        let link_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.cancel.child_token();
        let link = RelayLink {
            job_id,
            cancel: cancel.clone(),
            opened_at: chrono::Utc::now(),
        };
        self.links.write().await.insert(link_id.clone(), link);
        (link_id, cancel)
    }

    /// Forget a link by id. Unknown ids are ignored.
    pub async fn remove(&self, link_id: &str) {
        self.links.write().await.remove(link_id);
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Number of live links relaying `job_id`.
    pub async fn links_for_job(&self, job_id: &JobId) -> usize {
        self.links
            .read()
            .await
            .values()
            .filter(|link| &link.job_id == job_id)
            .count()
    }

    /// Cancel every link and clear the map.
    ///
    /// Used during graceful shutdown; each link task closes both of its
    /// legs when its token fires.
    pub async fn shutdown_all(&self) {
        self.cancel.cancel();
        let mut links = self.links.write().await;
        let count = links.len();
        for link in links.values() {
            link.cancel.cancel();
        }
        links.clear();
        tracing::info!(count, "Closed all relay links");
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}
