//! Transport seam between a [`ChannelClient`](crate::client::ChannelClient)
//! and the network.
//!
//! A [`Connector`] dials the progress channel of one job and hands back a
//! [`Transport`]: a boxed frame sink plus a boxed frame stream. The
//! production implementation is [`WsConnector`], which speaks WebSocket via
//! tokio-tungstenite.

use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use novagen_core::protocol::progress_path;
use novagen_core::JobId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Default bound on a single WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// An established, split connection to one job's progress channel.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
        R: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens transports to per-job progress channels.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a transport to the progress channel of `job_id`.
    ///
    /// Resolves once the handshake has completed or failed.
    async fn connect(&self, job_id: &JobId) -> Result<Transport, ConnectError>;
}

/// WebSocket connector targeting a relay (or any service exposing
/// `/ws/progress/{job_id}`).
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// * `base_url` - service base, e.g. `ws://host:3000`. `http://` and
    ///   `https://` are rewritten to `ws://` and `wss://`.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            base_url: websocket_base(&base_url.into()),
            connect_timeout,
        }
    }

    /// WebSocket base URL after scheme rewriting.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the progress channel for `job_id`.
    pub fn channel_url(&self, job_id: &JobId) -> String {
        format!("{}{}", self.base_url, progress_path(job_id))
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, job_id: &JobId) -> Result<Transport, ConnectError> {
        let url = self.channel_url(job_id);

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
            .map_err(|e| ConnectError::Connection(format!("Failed to connect to {url}: {e}")))?;

        tracing::debug!(job_id = %job_id, url = %url, "Progress channel handshake complete");

        let (sink, stream) = ws_stream.split();
        Ok(Transport::new(sink, stream))
    }
}

/// Rewrite an HTTP base URL into its WebSocket form and drop trailing slashes.
fn websocket_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Errors that can occur while establishing a progress channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// The transport could not be established (refused, handshake rejected).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not finish within the configured bound.
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The channel was closed and will not connect again.
    #[error("Channel is closed")]
    Closed,
}
