//! Client side of NovaGen progress channels.
//!
//! - [`client`]: one self-healing connection per job with local fan-out.
//! - [`registry`]: job-keyed pool with grace-delay eviction.
//! - [`observer`]: snapshot view over a channel.
//! - [`transport`]: the `Connector` seam and its WebSocket implementation.
//! - [`reconnect`]: exponential backoff policy.

pub mod client;
pub mod config;
pub mod keepalive;
pub mod observer;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use client::{ChannelClient, ChannelState, ClientOptions, Unsubscribe};
pub use config::{ChannelConfig, ConfigError};
pub use observer::ProgressObserver;
pub use reconnect::ReconnectConfig;
pub use registry::ChannelRegistry;
pub use transport::{ConnectError, Connector, Transport, WsConnector};
