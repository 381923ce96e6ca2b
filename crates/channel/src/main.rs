use anyhow::Context;
use novagen_channel::{ChannelConfig, ChannelRegistry, ChannelState, ProgressObserver};
use novagen_core::JobId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "novagen_channel=info,novagen_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Arguments ---
    let raw = std::env::args()
        .nth(1)
        .context("usage: novagen-watch <job_id>")?;
    let job_id = JobId::parse(&raw).context("invalid job id")?;

    // --- Configuration ---
    let config = ChannelConfig::from_env()?;
    tracing::info!(base_url = %config.base_url, job_id = %job_id, "Watching job progress");

    let registry = ChannelRegistry::from_config(&config);
    let client = registry.get(&job_id);
    let mut observer = ProgressObserver::attach(&client);
    let mut states = client.state_changes();

    if let Err(e) = client.connect().await {
        tracing::warn!(error = %e, "Initial connect failed, retrying in background");
    }

    let finished = loop {
        tokio::select! {
            snapshot = observer.changed() => {
                let Some(snapshot) = snapshot else { break false };
                tracing::info!(
                    stage = %snapshot.stage,
                    step = snapshot.step,
                    total_steps = snapshot.total_steps,
                    progress_pct = snapshot.progress_pct,
                    eta_sec = snapshot.eta_sec,
                    message = %snapshot.message,
                    "Progress",
                );
                if snapshot.is_finished() {
                    break true;
                }
            }
            changed = states.changed() => {
                if changed.is_err() || *states.borrow_and_update() == ChannelState::Closed {
                    break client.is_finished();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break false;
            }
        }
    };

    let snapshot = observer.detach();
    registry.evict_all();

    if !finished {
        anyhow::bail!("progress channel for {job_id} closed before the job finished");
    }

    if snapshot.is_error {
        tracing::warn!(
            error = snapshot.error_message.as_deref().unwrap_or_default(),
            "Job failed",
        );
    } else {
        tracing::info!(elapsed_sec = snapshot.elapsed_sec, "Job complete");
    }
    Ok(())
}
