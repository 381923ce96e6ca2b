//! Shared helpers for progress channel tests.
//!
//! [`MemoryConnector`] replaces the network with in-memory frame channels.
//! Each connect attempt follows a scripted plan (accept or refuse) and is
//! timestamped with `tokio::time::Instant`, so backoff can be checked under
//! paused time.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use novagen_channel::client::{ChannelClient, ChannelState, ClientOptions};
use novagen_channel::reconnect::ReconnectConfig;
use novagen_channel::{ConnectError, Connector, Transport, Unsubscribe};
use novagen_core::{EventKind, JobId, ProgressEvent};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    Refuse,
}

/// Scripted in-memory connector. Attempts beyond the script are refused.
pub struct MemoryConnector {
    plan: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub fn new(plan: &[Plan]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plan: Mutex::new(plan.iter().copied().collect()),
            attempts: Mutex::new(Vec::new()),
            accepted,
        });
        (connector, rx)
    }

    pub fn push(&self, plan: Plan) {
        self.plan.lock().unwrap().push_back(plan);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Time between consecutive connect attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        let attempts = self.attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _job_id: &JobId) -> Result<Transport, ConnectError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let plan = self.plan.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);

        match plan {
            Plan::Refuse => Err(ConnectError::Connection("connection refused".into())),
            Plan::Accept => {
                let (to_client, client_rx) = frames::unbounded::<Result<Message, WsError>>();
                let (client_tx, from_client) = frames::unbounded::<Message>();

                let sink = client_tx.sink_map_err(|_| WsError::ConnectionClosed);
                let _ = self.accepted.send(ServerEnd {
                    to_client,
                    from_client,
                });
                Ok(Transport::new(sink, client_rx))
            }
        }
    }
}

/// Server side of an accepted in-memory transport.
pub struct ServerEnd {
    to_client: frames::UnboundedSender<Result<Message, WsError>>,
    from_client: frames::UnboundedReceiver<Message>,
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Message::Text(text.to_string())));
    }

    pub fn send_event(&self, event: &ProgressEvent) {
        self.send_text(&event.encode());
    }

    /// Send a close frame; the client treats it as the end of the session.
    pub fn close(&self) {
        let _ = self.to_client.unbounded_send(Ok(Message::Close(None)));
    }

    /// Next text frame written by the client, or `None` once it hung up.
    pub async fn recv_text(&mut self) -> Option<String> {
        while let Some(frame) = self.from_client.next().await {
            if let Message::Text(text) = frame {
                return Some(text);
            }
        }
        None
    }
}

pub fn job(raw: &str) -> JobId {
    JobId::parse(raw).unwrap()
}

pub fn stage(job_id: &JobId, stage: &str) -> ProgressEvent {
    ProgressEvent::new(
        job_id.clone(),
        EventKind::StageChange {
            stage: stage.into(),
            message: String::new(),
        },
    )
}

pub fn step(job_id: &JobId, step: u32, total_steps: u32) -> ProgressEvent {
    ProgressEvent::new(
        job_id.clone(),
        EventKind::StepComplete {
            step,
            total_steps,
            progress_pct: f64::from(step) / f64::from(total_steps) * 100.0,
            elapsed_sec: f64::from(step),
            eta_sec: f64::from(total_steps - step),
        },
    )
}

pub fn completed(job_id: &JobId) -> ProgressEvent {
    ProgressEvent::new(
        job_id.clone(),
        EventKind::Completed {
            message: "done".into(),
            elapsed_sec: 12.5,
        },
    )
}

pub fn failed(job_id: &JobId, message: &str) -> ProgressEvent {
    ProgressEvent::new(
        job_id.clone(),
        EventKind::Failed {
            message: message.into(),
        },
    )
}

/// Client options with keepalive disabled so paused-time tests settle.
pub fn quiet_options() -> ClientOptions {
    ClientOptions {
        reconnect: ReconnectConfig::default(),
        keepalive_interval: None,
    }
}

pub fn client(connector: Arc<MemoryConnector>, job_id: &JobId) -> ChannelClient {
    ChannelClient::new(job_id.clone(), connector, quiet_options())
}

/// Subscribe a collector that forwards every event to a channel.
pub fn collect(client: &ChannelClient) -> (Unsubscribe, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = client.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    (handle, rx)
}

pub async fn wait_for_state(client: &ChannelClient, target: ChannelState) {
    let mut states = client.state_changes();
    tokio::time::timeout(Duration::from_secs(120), states.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for channel state")
        .expect("state sender dropped");
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> ProgressEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscriber channel closed")
}
