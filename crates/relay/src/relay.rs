//! WebSocket relay between progress consumers and the execution service.
//!
//! Every downstream connection accepted on `/ws/progress/{job_id}` is paired
//! with exactly one upstream connection to the same path on the execution
//! service. Text and binary messages are forwarded verbatim in both
//! directions; control frames stay hop-by-hop. When either leg ends, the
//! other is closed. The relay never buffers, retries or reconnects.

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{self, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use novagen_core::protocol::progress_path;
use novagen_core::JobId;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

type Upstream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Close code sent downstream when the upstream leg cannot be used.
const INTERNAL_ERROR: u16 = 1011;
/// Close code sent on both legs when the relay shuts down.
const GOING_AWAY: u16 = 1001;

/// GET /ws/progress/{job_id} -- validates the job id, then upgrades.
pub async fn ws_route(
    Path(raw_job_id): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let job_id = JobId::parse(raw_job_id)?;
    let ws = ws.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    Ok(ws
        .on_upgrade(move |socket| run_link(socket, job_id, state))
        .into_response())
}

/// Why the pump loop stopped.
enum LinkEnd {
    /// Relay shutdown.
    Cancelled,
    /// The consumer closed or dropped its connection.
    Downstream(Option<CloseFrame>),
    /// The execution service sent a close frame.
    UpstreamClosed(Option<UpstreamCloseFrame<'static>>),
    /// The upstream connection failed without a close handshake.
    UpstreamLost,
}

/// Drive one relay link from upgrade to teardown.
async fn run_link(socket: WebSocket, job_id: JobId, state: AppState) {
    let (link_id, cancel) = state.links.add(job_id.clone()).await;
    let close_timeout = state.config.link_close_timeout;
    tracing::info!(link_id = %link_id, job_id = %job_id, "Relay link opened");

    match open_upstream(&state, &job_id, &cancel).await {
        Ok(upstream) => {
            pump(socket, upstream, &cancel, close_timeout, &link_id).await;
        }
        Err(reason) => {
            let code = if cancel.is_cancelled() {
                GOING_AWAY
            } else {
                INTERNAL_ERROR
            };
            tracing::warn!(
                link_id = %link_id,
                job_id = %job_id,
                error = %reason,
                "Upstream unavailable, closing downstream",
            );
            close_downstream(socket, code, reason, close_timeout).await;
        }
    }

    state.links.remove(&link_id).await;
    tracing::info!(link_id = %link_id, job_id = %job_id, "Relay link closed");
}

/// Open the upstream leg for `job_id`, bounded by the connect timeout.
async fn open_upstream(
    state: &AppState,
    job_id: &JobId,
    cancel: &CancellationToken,
) -> Result<Upstream, String> {
    let url = format!("{}{}", state.config.upstream_ws_url, progress_path(job_id));
    let timeout = state.config.upstream_connect_timeout;

    tokio::select! {
        () = cancel.cancelled() => Err("relay shutting down".to_string()),
        result = tokio::time::timeout(timeout, connect_async(&url)) => match result {
            Ok(Ok((upstream, _response))) => {
                tracing::debug!(job_id = %job_id, url = %url, "Upstream leg connected");
                Ok(upstream)
            }
            Ok(Err(e)) => Err(format!("upstream connect failed: {e}")),
            Err(_) => Err(format!("upstream connect timed out after {timeout:?}")),
        },
    }
}

/// Forward messages both ways until either leg ends, then close the other.
async fn pump(
    downstream: WebSocket,
    upstream: Upstream,
    cancel: &CancellationToken,
    close_timeout: Duration,
    link_id: &str,
) {
    let (mut down_tx, mut down_rx) = downstream.split();
    let (mut up_tx, mut up_rx) = upstream.split();

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => break LinkEnd::Cancelled,

            msg = down_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = up_tx.send(UpstreamMessage::Text(text.as_str().to_owned())).await {
                        tracing::debug!(link_id, error = %e, "Upstream send failed");
                        break LinkEnd::UpstreamLost;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = up_tx.send(UpstreamMessage::Binary(data.to_vec())).await {
                        tracing::debug!(link_id, error = %e, "Upstream send failed");
                        break LinkEnd::UpstreamLost;
                    }
                }
                Some(Ok(Message::Close(frame))) => break LinkEnd::Downstream(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(link_id, error = %e, "Downstream receive error");
                    break LinkEnd::Downstream(None);
                }
                None => break LinkEnd::Downstream(None),
            },

            msg = up_rx.next() => match msg {
                Some(Ok(UpstreamMessage::Text(text))) => {
                    if let Err(e) = down_tx.send(Message::Text(text.into())).await {
                        tracing::debug!(link_id, error = %e, "Downstream send failed");
                        break LinkEnd::Downstream(None);
                    }
                }
                Some(Ok(UpstreamMessage::Binary(data))) => {
                    if let Err(e) = down_tx.send(Message::Binary(data.into())).await {
                        tracing::debug!(link_id, error = %e, "Downstream send failed");
                        break LinkEnd::Downstream(None);
                    }
                }
                Some(Ok(UpstreamMessage::Close(frame))) => break LinkEnd::UpstreamClosed(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(link_id, error = %e, "Upstream receive error");
                    break LinkEnd::UpstreamLost;
                }
                None => break LinkEnd::UpstreamLost,
            },
        }
    };

    let (to_upstream, to_downstream) = match end {
        LinkEnd::Cancelled => {
            tracing::debug!(link_id, "Relay link cancelled");
            (
                Some(upstream_close(GOING_AWAY, "relay shutting down")),
                Some(downstream_close(GOING_AWAY, "relay shutting down")),
            )
        }
        LinkEnd::Downstream(frame) => {
            tracing::debug!(link_id, ?frame, "Downstream ended, closing upstream");
            (frame.map(to_upstream_frame), None)
        }
        LinkEnd::UpstreamClosed(frame) => {
            tracing::debug!(link_id, ?frame, "Upstream closed, closing downstream");
            (None, frame.map(to_downstream_frame))
        }
        LinkEnd::UpstreamLost => {
            tracing::debug!(link_id, "Upstream lost, closing downstream");
            (
                None,
                Some(downstream_close(INTERNAL_ERROR, "upstream connection lost")),
            )
        }
    };

    let close_upstream = async {
        let _ = up_tx.send(UpstreamMessage::Close(to_upstream)).await;
        let _ = up_tx.close().await;
    };
    let close_downstream = async {
        let _ = down_tx.send(Message::Close(to_downstream)).await;
        let _ = down_tx.close().await;
    };

    if tokio::time::timeout(close_timeout, async {
        tokio::join!(close_upstream, close_downstream)
    })
    .await
    .is_err()
    {
        tracing::debug!(link_id, "Close handshake timed out");
    }
}

/// Close a downstream socket that never got an upstream leg.
async fn close_downstream(mut socket: WebSocket, code: u16, reason: String, timeout: Duration) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = tokio::time::timeout(timeout, async {
        let _ = socket.send(Message::Close(Some(frame))).await;
        let _ = socket.close().await;
    })
    .await;
}

fn downstream_close(code: u16, reason: &'static str) -> CloseFrame {
    CloseFrame {
        code,
        reason: ws::Utf8Bytes::from_static(reason),
    }
}

fn upstream_close(code: u16, reason: &'static str) -> UpstreamCloseFrame<'static> {
    UpstreamCloseFrame {
        code: CloseCode::from(code),
        reason: Cow::Borrowed(reason),
    }
}

fn to_upstream_frame(frame: CloseFrame) -> UpstreamCloseFrame<'static> {
    UpstreamCloseFrame {
        code: CloseCode::from(frame.code),
        reason: Cow::Owned(frame.reason.as_str().to_owned()),
    }
}

fn to_downstream_frame(frame: UpstreamCloseFrame<'static>) -> CloseFrame {
    CloseFrame {
        code: u16::from(frame.code),
        reason: frame.reason.into_owned().into(),
    }
}
