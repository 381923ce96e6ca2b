//! Live progress view over a [`ChannelClient`].

use novagen_core::ProgressSnapshot;
use tokio::sync::watch;

use crate::client::{ChannelClient, Unsubscribe};

/// Folds every event of a channel into a [`ProgressSnapshot`] published on a
/// `watch` channel.
pub struct ProgressObserver {
    snapshot: watch::Receiver<ProgressSnapshot>,
    subscription: Unsubscribe,
}

impl ProgressObserver {
    /// Subscribe to `client` and start folding its events.
    ///
    /// If the job already finished on this channel the terminal event is
    /// folded in before `attach` returns.
    pub fn attach(client: &ChannelClient) -> Self {
        let (tx, rx) = watch::channel(ProgressSnapshot::for_job(client.job_id().clone()));
        let subscription = client.subscribe(move |event| {
            tx.send_modify(|snapshot| snapshot.apply(event));
        });
        Self {
            snapshot: rx,
            subscription,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the next change and return the new snapshot.
    ///
    /// Returns `None` once the channel has dropped this observer's
    /// subscription (the client was closed or dropped).
    pub async fn changed(&mut self) -> Option<ProgressSnapshot> {
        self.snapshot.changed().await.ok()?;
        Some(self.snapshot.borrow_and_update().clone())
    }

    /// Stop observing and return the last snapshot.
    pub fn detach(self) -> ProgressSnapshot {
        self.subscription.unsubscribe();
        let snapshot = self.snapshot.borrow().clone();
        snapshot
    }
}
