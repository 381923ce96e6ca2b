//! Progress channel wire protocol.
//!
//! Every frame on a progress channel is a text frame holding either one of
//! the keepalive literals (`ping` / `pong`) or a JSON object of the shape
//!
//! ```json
//! {"event": "step_complete", "job_id": "job-42", "timestamp": "...",
//!  "step": 5, "total_steps": 20, "progress": 25.0, "elapsed": 3.1, "eta": 9.4}
//! ```
//!
//! The `event` tag selects the [`EventKind`] variant. Fields this module
//! does not know about are ignored so emitters can add data without
//! breaking older receivers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Keepalive probe sent by channel clients.
pub const PING: &str = "ping";

/// Keepalive answer sent by the execution service. Never surfaced as an event.
pub const PONG: &str = "pong";

/// Axum route pattern of the per-job progress channel.
pub const PROGRESS_ROUTE: &str = "/ws/progress/{job_id}";

/// Path of the progress channel for `job_id`, relative to a service base URL.
pub fn progress_path(job_id: &JobId) -> String {
    format!("/ws/progress/{job_id}")
}

/// One discrete update about a job's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    #[serde(with = "wire_timestamp", default = "Utc::now")]
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Payload of a [`ProgressEvent`], tagged on the wire by the `event` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// The job entered a named phase (`initializing`, `generating`, ...).
    StageChange {
        stage: String,
        #[serde(default)]
        message: String,
    },

    /// One unit of work finished.
    StepComplete {
        step: u32,
        total_steps: u32,
        /// Completion percentage in `[0, 100]`.
        #[serde(rename = "progress")]
        progress_pct: f64,
        #[serde(rename = "elapsed", default)]
        elapsed_sec: f64,
        #[serde(rename = "eta", default)]
        eta_sec: f64,
    },

    /// Terminal success.
    #[serde(rename = "generation_complete")]
    Completed {
        #[serde(default)]
        message: String,
        #[serde(rename = "elapsed", default)]
        elapsed_sec: f64,
    },

    /// Terminal failure.
    #[serde(rename = "error")]
    Failed {
        #[serde(default)]
        message: String,
    },
}

impl ProgressEvent {
    /// Build an event stamped with the current time.
    pub fn new(job_id: JobId, kind: EventKind) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// `true` for `Completed` and `Failed`; nothing may follow these on a channel.
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// The `event` tag this event carries on the wire.
    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::StageChange { .. } => "stage_change",
            Self::StepComplete { .. } => "step_complete",
            Self::Completed { .. } => "generation_complete",
            Self::Failed { .. } => "error",
        }
    }
}

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Ping,
    Pong,
    Event(ProgressEvent),
}

impl WireMessage {
    /// Decode one text frame.
    ///
    /// A `generation_complete` object carrying `"success": false` is read
    /// as [`EventKind::Failed`]; emitters use that form to report failure
    /// at the end of a run.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match text {
            PING => return Ok(Self::Ping),
            PONG => return Ok(Self::Pong),
            _ => {}
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let unsuccessful_completion = value.get("event").and_then(|v| v.as_str())
            == Some("generation_complete")
            && value.get("success").and_then(|v| v.as_bool()) == Some(false);

        let mut event: ProgressEvent = serde_json::from_value(value)?;

        if unsuccessful_completion {
            if let EventKind::Completed { message, .. } = &event.kind {
                event.kind = EventKind::Failed {
                    message: message.clone(),
                };
            }
        }

        validate(&event)?;
        Ok(Self::Event(event))
    }

    /// Encode as the text frame sent on the wire.
    pub fn encode(&self) -> String {
        match self {
            Self::Ping => PING.to_string(),
            Self::Pong => PONG.to_string(),
            Self::Event(event) => event.encode(),
        }
    }
}

impl ProgressEvent {
    /// Serialize to the JSON text frame.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("ProgressEvent is always serialisable")
    }
}

fn validate(event: &ProgressEvent) -> Result<(), ProtocolError> {
    if let EventKind::StepComplete {
        progress_pct,
        elapsed_sec,
        eta_sec,
        ..
    } = &event.kind
    {
        if !progress_pct.is_finite() || !(0.0..=100.0).contains(progress_pct) {
            return Err(ProtocolError::InvalidField {
                field: "progress",
                reason: format!("{progress_pct} is outside [0, 100]"),
            });
        }
        if !elapsed_sec.is_finite() || !eta_sec.is_finite() {
            return Err(ProtocolError::InvalidField {
                field: "elapsed/eta",
                reason: "must be finite".into(),
            });
        }
    }
    Ok(())
}

/// Errors raised while decoding a text frame.
///
/// Receivers log these and drop the frame; they never affect channel state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// RFC 3339 on output; RFC 3339 or zone-less ISO 8601 (read as UTC) on input.
mod wire_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::types::Timestamp;

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|_| de::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}
