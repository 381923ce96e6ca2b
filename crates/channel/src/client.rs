//! Per-job progress channel.
//!
//! A [`ChannelClient`] owns one physical connection to the progress channel
//! of a single job. It decodes incoming frames, fans every
//! [`ProgressEvent`] out to its local subscribers, answers to
//! [`send_ping`](ChannelClient::send_ping) and heals itself after an
//! unexpected transport loss with exponential backoff.
//!
//! Lifecycle: `Connecting` -> `Open` -> (`Reconnecting` -> `Open`)* ->
//! `Closed`. The channel reaches `Closed` when [`close`](ChannelClient::close)
//! is called, when the retry budget is exhausted, or when the transport ends
//! after the job's terminal event.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use novagen_core::protocol::PING;
use novagen_core::{JobId, ProgressEvent, WireMessage};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::keepalive::spawn_keepalive;
use crate::reconnect::ReconnectConfig;
use crate::transport::{ConnectError, Connector, Transport};

/// Default interval between keepalive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on flushing a close frame when a session ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of a [`ChannelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Callback invoked for every received [`ProgressEvent`].
pub type EventCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Per-client tuning shared by every channel a registry creates.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub reconnect: ReconnectConfig,
    /// `None` disables the keepalive task.
    pub keepalive_interval: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
        }
    }
}

/// Handle to the progress channel of one job.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

/// Non-owning handle used by background tasks.
#[derive(Clone)]
pub struct WeakChannelClient {
    inner: Weak<ClientInner>,
}

struct ClientInner {
    job_id: JobId,
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    state: watch::Sender<ChannelState>,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Mutex<Subscribers>,
    /// Cancelled once the client is closed for good; parent of every
    /// session, retry and keepalive token.
    cancel: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    /// Retries scheduled since the last successful connect.
    attempts: u32,
    handshake_in_flight: bool,
    closed: bool,
    keepalive_started: bool,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    session: Option<CancellationToken>,
    retry: Option<CancellationToken>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, EventCallback)>,
    /// The job's terminal event, once delivered.
    terminal: Option<ProgressEvent>,
}

/// How a session ended.
enum SessionEnd {
    Cancelled,
    ClosedByPeer,
    Failed(String),
}

/// Removes a subscription when [`unsubscribe`](Unsubscribe::unsubscribe) is called.
#[must_use = "dropping the handle leaves the callback subscribed"]
pub struct Unsubscribe {
    client: Weak<ClientInner>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.client.upgrade() {
            lock(&inner.subscribers)
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl ChannelClient {
    /// Create a client for `job_id`. Nothing is dialled until
    /// [`connect`](Self::connect) is called.
    pub fn new(job_id: JobId, connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            inner: Arc::new(ClientInner {
                job_id,
                connector,
                options,
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
                subscribers: Mutex::new(Subscribers::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.inner.job_id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Retries scheduled since the last successful connect.
    pub fn attempts(&self) -> u32 {
        lock(&self.inner.lifecycle).attempts
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).entries.len()
    }

    /// `true` once the job's terminal event has been delivered.
    pub fn is_finished(&self) -> bool {
        lock(&self.inner.subscribers).terminal.is_some()
    }

    /// `true` when both handles drive the same channel.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakChannelClient {
        WeakChannelClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Establish the transport.
    ///
    /// A no-op while the channel is open or a handshake is already in
    /// flight. On failure the reconnect policy takes over and the error is
    /// returned to the caller.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut lc = lock(&self.inner.lifecycle);
            if lc.closed {
                return Err(ConnectError::Closed);
            }
            if lc.handshake_in_flight || self.state() == ChannelState::Open {
                return Ok(());
            }
            lc.handshake_in_flight = true;
            if let Some(retry) = lc.retry.take() {
                retry.cancel();
            }
        }

        let job_id = &self.inner.job_id;
        tracing::debug!(job_id = %job_id, "Connecting progress channel");

        let result = tokio::select! {
            () = self.inner.cancel.cancelled() => Err(ConnectError::Closed),
            result = self.inner.connector.connect(job_id) => result,
        };

        match result {
            Ok(transport) => self.on_open(transport),
            Err(ConnectError::Closed) => {
                lock(&self.inner.lifecycle).handshake_in_flight = false;
                Err(ConnectError::Closed)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Progress channel connect failed");
                let mut lc = lock(&self.inner.lifecycle);
                lc.handshake_in_flight = false;
                if !lc.closed {
                    self.schedule_retry(&mut lc);
                }
                Err(e)
            }
        }
    }

    /// Register a callback for every subsequent event.
    ///
    /// If the job already finished on this channel, the callback receives
    /// the terminal event immediately.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        let (id, replay) = {
            let mut subs = lock(&self.inner.subscribers);
            let id = subs.next_id;
            subs.next_id += 1;
            subs.entries.push((id, Arc::clone(&callback)));
            (id, subs.terminal.clone())
        };

        if let Some(terminal) = replay {
            callback(&terminal);
        }

        Unsubscribe {
            client: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Send the `ping` keepalive literal if the channel is open.
    pub fn send_ping(&self) {
        let lc = lock(&self.inner.lifecycle);
        if self.state() != ChannelState::Open {
            return;
        }
        if let Some(outbound) = &lc.outbound {
            let _ = outbound.send(Message::Text(PING.to_string()));
        }
    }

    /// Tear down the transport, cancel pending retries and drop every
    /// subscriber. The channel never reconnects afterwards.
    pub fn close(&self) {
        {
            let mut lc = lock(&self.inner.lifecycle);
            if !lc.closed {
                tracing::info!(job_id = %self.inner.job_id, "Closing progress channel");
            }
            lc.closed = true;
            lc.handshake_in_flight = false;
            lc.outbound = None;
            if let Some(session) = lc.session.take() {
                session.cancel();
            }
            if let Some(retry) = lc.retry.take() {
                retry.cancel();
            }
            self.inner.cancel.cancel();
            self.inner.state.send_replace(ChannelState::Closed);
        }
        lock(&self.inner.subscribers).entries.clear();
    }

    // ---- private helpers ----

    fn on_open(&self, transport: Transport) -> Result<(), ConnectError> {
        let mut lc = lock(&self.inner.lifecycle);
        lc.handshake_in_flight = false;
        if lc.closed {
            return Err(ConnectError::Closed);
        }

        lc.attempts = 0;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        lc.outbound = Some(outbound_tx);
        let session = self.inner.cancel.child_token();
        lc.session = Some(session.clone());
        self.inner.state.send_replace(ChannelState::Open);

        if !lc.keepalive_started {
            if let Some(interval) = self.inner.options.keepalive_interval {
                lc.keepalive_started = true;
                spawn_keepalive(self.downgrade(), interval, self.inner.cancel.child_token());
            }
        }

        tracing::info!(job_id = %self.inner.job_id, "Progress channel open");
        tokio::spawn(run_session(self.clone(), transport, outbound_rx, session));
        Ok(())
    }

    /// Apply the reconnect policy after a failed connect or a lost session.
    fn schedule_retry(&self, lc: &mut Lifecycle) {
        let job_id = &self.inner.job_id;
        let policy = &self.inner.options.reconnect;

        if !policy.allows_retry(lc.attempts) {
            tracing::warn!(
                job_id = %job_id,
                attempts = lc.attempts,
                "Reconnect attempts exhausted, closing progress channel",
            );
            lc.closed = true;
            self.inner.cancel.cancel();
            self.inner.state.send_replace(ChannelState::Closed);
            return;
        }

        let delay = policy.delay_for(lc.attempts);
        lc.attempts += 1;
        let attempt = lc.attempts;
        self.inner.state.send_replace(ChannelState::Reconnecting);

        let token = self.inner.cancel.child_token();
        if let Some(previous) = lc.retry.replace(token.clone()) {
            previous.cancel();
        }

        tracing::info!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling progress channel reconnect",
        );

        let client = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = client.connect().await;
                }
            }
        });
    }

    fn on_session_end(&self, end: SessionEnd) {
        let job_id = &self.inner.job_id;
        let mut lc = lock(&self.inner.lifecycle);
        lc.outbound = None;
        lc.session = None;

        if lc.closed {
            return;
        }

        if self.is_finished() {
            tracing::info!(job_id = %job_id, "Progress channel ended after terminal event");
            lc.closed = true;
            self.inner.cancel.cancel();
            self.inner.state.send_replace(ChannelState::Closed);
            return;
        }

        match end {
            SessionEnd::Cancelled => return,
            SessionEnd::ClosedByPeer => {
                tracing::warn!(job_id = %job_id, "Progress channel closed unexpectedly");
            }
            SessionEnd::Failed(error) => {
                tracing::warn!(job_id = %job_id, error = %error, "Progress channel transport error");
            }
        }

        self.schedule_retry(&mut lc);
    }

    fn handle_text(&self, text: &str) {
        match WireMessage::decode(text) {
            Ok(WireMessage::Event(event)) => self.deliver(event),
            Ok(WireMessage::Pong) => {
                tracing::trace!(job_id = %self.inner.job_id, "Pong received");
            }
            Ok(WireMessage::Ping) => {
                tracing::debug!(job_id = %self.inner.job_id, "Ignoring ping from server");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.inner.job_id,
                    error = %e,
                    raw_message = %text,
                    "Dropping malformed progress message",
                );
            }
        }
    }

    /// Fan one event out to a snapshot of the subscriber set.
    fn deliver(&self, event: ProgressEvent) {
        if event.job_id != self.inner.job_id {
            tracing::warn!(
                job_id = %self.inner.job_id,
                event_job_id = %event.job_id,
                "Dropping event addressed to another job",
            );
            return;
        }

        let callbacks: Vec<EventCallback> = {
            let mut subs = lock(&self.inner.subscribers);
            if subs.terminal.is_some() {
                tracing::debug!(
                    job_id = %self.inner.job_id,
                    event = event.tag(),
                    "Dropping event received after terminal event",
                );
                return;
            }
            if event.is_terminal() {
                subs.terminal = Some(event.clone());
            }
            subs.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        tracing::debug!(
            job_id = %self.inner.job_id,
            event = event.tag(),
            subscribers = callbacks.len(),
            "Progress event received",
        );

        for callback in callbacks {
            callback(&event);
        }
    }
}

impl WeakChannelClient {
    pub fn upgrade(&self) -> Option<ChannelClient> {
        self.inner.upgrade().map(|inner| ChannelClient { inner })
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("job_id", &self.inner.job_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Read frames until the transport ends or the session is cancelled.
///
/// Outbound frames (pings) are written from the same loop, so the reader
/// is the only task touching the transport.
async fn run_session(
    client: ChannelClient,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    session: CancellationToken,
) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let end = loop {
        tokio::select! {
            () = session.cancelled() => break SessionEnd::Cancelled,
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    break SessionEnd::Failed(e.to_string());
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => client.handle_text(&text),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(job_id = %client.job_id(), ?frame, "Close frame received");
                    break SessionEnd::ClosedByPeer;
                }
                Some(Ok(_)) => {
                    // Binary and control frames carry no progress data.
                }
                Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                None => break SessionEnd::ClosedByPeer,
            },
        }
    };

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    client.on_session_end(end);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
