use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::WeakChannelClient;

/// Spawn a background task that sends the `ping` literal on `client` every
/// `interval`.
///
/// The task runs until `cancel` fires or the client is dropped. Pings are
/// skipped while the channel is not open.
pub fn spawn_keepalive(
    client: WeakChannelClient,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(client) = client.upgrade() else { break };
                    tracing::trace!(job_id = %client.job_id(), "Progress channel keepalive ping");
                    client.send_ping();
                }
            }
        }
    })
}
