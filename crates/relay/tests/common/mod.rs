//! Shared helpers for relay integration tests.
//!
//! Tests run a fake execution service (a bare tokio-tungstenite server) and
//! a real relay bound to an ephemeral port, then connect to the relay as a
//! downstream consumer.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request as WsRequest, Response as WsResponse};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use novagen_relay::config::RelayConfig;
use novagen_relay::state::AppState;

pub type Downstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One connection accepted by the fake execution service.
pub struct UpstreamConn {
    pub path: String,
    pub ws: WebSocketStream<TcpStream>,
}

/// Start a fake execution service; every accepted WebSocket is handed to
/// the returned receiver.
pub async fn spawn_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<UpstreamConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let ws = tokio_tungstenite::accept_hdr_async(
                    stream,
                    |req: &WsRequest, resp: WsResponse| {
                        path = req.uri().path().to_string();
                        Ok(resp)
                    },
                )
                .await;
                if let Ok(ws) = ws {
                    let _ = tx.send(UpstreamConn { path, ws });
                }
            });
        }
    });

    (addr, rx)
}

/// An address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn test_config(upstream: SocketAddr) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        upstream_ws_url: format!("ws://{upstream}"),
        upstream_http_url: format!("http://{upstream}"),
        upstream_connect_timeout: Duration::from_secs(2),
        link_close_timeout: Duration::from_secs(2),
        health_probe_timeout: Duration::from_secs(1),
    }
}

/// Serve the relay on an ephemeral port.
pub async fn spawn_relay(config: RelayConfig) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let app = novagen_relay::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

pub async fn connect_downstream(relay: SocketAddr, job_id: &str) -> Downstream {
    let url = format!("ws://{relay}/ws/progress/{job_id}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

pub async fn next_upstream(rx: &mut mpsc::UnboundedReceiver<UpstreamConn>) -> UpstreamConn {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("relay never connected upstream")
        .expect("upstream listener stopped")
}

/// Next data or close frame, skipping control frames.
pub async fn next_frame<S>(ws: &mut WebSocketStream<S>) -> Option<Message>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let read = async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(msg) => return Some(msg),
                Err(_) => return None,
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a frame")
}

/// Wait for a close frame and return it.
pub async fn expect_close<S>(ws: &mut WebSocketStream<S>) -> Option<CloseFrame<'static>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match next_frame(ws).await {
            Some(Message::Close(frame)) => return frame,
            Some(_) => continue,
            None => panic!("connection ended without a close frame"),
        }
    }
}

/// Poll until the relay has no live links.
pub async fn wait_for_no_links(state: &AppState) {
    for _ in 0..100 {
        if state.links.link_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("relay links were not cleaned up");
}

/// Send a GET request through the router without a network socket.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Minimal HTTP upstream answering `/health` with `status`.
pub async fn spawn_http_upstream(status: StatusCode) -> SocketAddr {
    let app = Router::new().route("/health", axum::routing::get(move || async move { status }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
