//! Pool of progress channels keyed by job.
//!
//! [`ChannelRegistry`] hands out at most one [`ChannelClient`] per job so
//! every consumer of that job shares a single physical connection.
//! Releasing a job does not tear its channel down immediately: eviction is
//! deferred by a grace delay so a consumer that re-acquires the job shortly
//! afterwards (or subscribes late to a job that just finished) reuses the
//! same channel.
//!
//! A channel that reaches `Closed` on its own is dropped from the pool: at
//! once when its retries ran out, after the grace delay when it closed
//! behind the job's terminal event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use novagen_core::JobId;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelClient, ChannelState, ClientOptions};
use crate::config::ChannelConfig;
use crate::transport::{Connector, WsConnector};

/// Job-keyed pool of [`ChannelClient`]s.
///
/// Constructed explicitly and passed to whoever needs channels; clones
/// share the same pool.
#[derive(Clone)]
pub struct ChannelRegistry {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    eviction_grace: Duration,
    entries: Arc<Mutex<HashMap<JobId, Entry>>>,
}

struct Entry {
    client: ChannelClient,
    /// Pending eviction timer, if the job has been released.
    eviction: Option<CancellationToken>,
}

impl ChannelRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: &ChannelConfig) -> Self {
        Self {
            connector,
            options: config.client.clone(),
            eviction_grace: config.eviction_grace,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registry dialling `config.base_url` over WebSocket.
    pub fn from_config(config: &ChannelConfig) -> Self {
        let connector = WsConnector::new(config.base_url.clone(), config.connect_timeout);
        Self::new(Arc::new(connector), config)
    }

    /// Return the channel for `job_id`, creating it (not connected) if
    /// needed.
    ///
    /// A pending eviction for the job is cancelled. A closed channel that
    /// never delivered its terminal event is replaced by a fresh one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get(&self, job_id: &JobId) -> ChannelClient {
        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(job_id) {
            if let Some(eviction) = entry.eviction.take() {
                eviction.cancel();
                tracing::debug!(job_id = %job_id, "Cancelled pending channel eviction");
            }

            let reusable =
                entry.client.state() != ChannelState::Closed || entry.client.is_finished();
            if reusable {
                return entry.client.clone();
            }

            tracing::debug!(job_id = %job_id, "Replacing closed progress channel");
            entry.client.close();
        }

        let client = ChannelClient::new(
            job_id.clone(),
            Arc::clone(&self.connector),
            self.options.clone(),
        );
        entries.insert(
            job_id.clone(),
            Entry {
                client: client.clone(),
                eviction: None,
            },
        );
        self.watch_closed(&client);
        client
    }

    /// Schedule eviction of `job_id` after the grace delay.
    ///
    /// A [`get`](Self::get) before the timer fires cancels the eviction.
    /// While the channel still has subscribers the timer re-arms, so the
    /// job is evicted one grace delay after its last subscriber leaves.
    pub fn release(&self, job_id: &JobId) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(job_id) else {
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = entry.eviction.replace(token.clone()) {
            previous.cancel();
        }

        let grace = self.eviction_grace;
        let registry = Arc::downgrade(&self.entries);
        let job_id = job_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(grace) => {}
                }

                let Some(entries) = registry.upgrade() else {
                    return;
                };
                let evicted = {
                    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                    if token.is_cancelled() {
                        return;
                    }
                    let in_use = entries
                        .get(&job_id)
                        .is_some_and(|entry| entry.client.subscriber_count() > 0);
                    if in_use {
                        tracing::debug!(job_id = %job_id, "Channel still subscribed, deferring eviction");
                        continue;
                    }
                    entries.remove(&job_id)
                };

                if let Some(entry) = evicted {
                    tracing::debug!(job_id = %job_id, "Evicting progress channel");
                    entry.client.close();
                }
                return;
            }
        });
    }

    /// Drop `client` from the pool once it reaches `Closed`.
    ///
    /// A finished channel stays for one grace delay so late subscribers
    /// still get the terminal event replayed. Entries that were already
    /// replaced or evicted are left alone.
    fn watch_closed(&self, client: &ChannelClient) {
        let mut states = client.state_changes();
        let handle = client.downgrade();
        let registry = Arc::downgrade(&self.entries);
        let grace = self.eviction_grace;

        tokio::spawn(async move {
            let closed = states.wait_for(|s| *s == ChannelState::Closed).await.is_ok();
            if !closed {
                return;
            }
            let Some(client) = handle.upgrade() else {
                return;
            };
            if client.is_finished() {
                tokio::time::sleep(grace).await;
            }

            let Some(entries) = registry.upgrade() else {
                return;
            };
            let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
            let current = entries
                .get(client.job_id())
                .is_some_and(|entry| entry.client.ptr_eq(&client));
            if !current {
                return;
            }
            if let Some(entry) = entries.remove(client.job_id()) {
                if let Some(eviction) = entry.eviction {
                    eviction.cancel();
                }
                tracing::debug!(job_id = %client.job_id(), "Removing closed progress channel");
            }
        });
    }

    /// Cancel every pending eviction and close every channel.
    pub fn evict_all(&self) {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Closing all progress channels");
        }
        for entry in drained {
            if let Some(eviction) = entry.eviction {
                eviction.cancel();
            }
            entry.client.close();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
