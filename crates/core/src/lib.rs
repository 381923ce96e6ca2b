//! Shared types for NovaGen progress channels.
//!
//! - [`types`]: `JobId` and `Timestamp`.
//! - [`protocol`]: the progress event vocabulary and its text-frame codec.
//! - [`observer`]: the snapshot fold consumers display.
//! - [`reporter`]: emitter-side event builder.

pub mod error;
pub mod observer;
pub mod protocol;
pub mod reporter;
pub mod types;

pub use error::CoreError;
pub use observer::ProgressSnapshot;
pub use protocol::{EventKind, ProgressEvent, ProtocolError, WireMessage};
pub use reporter::ProgressReporter;
pub use types::{JobId, Timestamp};
