//! Wire-event parsing for the job event stream.
//!
//! The controller pushes flat JSON messages, `{"ts": <unix_ms>, "type":
//! "<kind>", "message": "...", "progress": N, "data": {...}}`. This
//! module turns one raw payload into a typed
//! [`JobEvent`](darkroom_core::job_events::JobEvent).
//!
//! Returns `Err` for malformed JSON or unknown `type` values. Callers
//! log and continue; a bad message never terminates the subscription.

use serde::Deserialize;

use darkroom_core::job_events::{EventData, EventKind, JobEvent};

/// Raw wire shape before kind mapping.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    data: Option<EventData>,
    /// Server emission time in unix milliseconds.
    #[serde(default)]
    ts: Option<i64>,
}

/// A single event payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type {0:?}")]
    UnknownKind(String),
}

/// Parse one event-stream payload into a [`JobEvent`] for `job_id`.
///
/// The job id comes from the subscription, not the wire; the controller
/// publishes each job's events on a per-job channel.
pub fn parse_event(job_id: &str, payload: &str) -> Result<JobEvent, ParseError> {
    let raw: RawEvent = serde_json::from_str(payload)?;

    let kind = match raw.kind.as_str() {
        "info" => EventKind::Info,
        "state" => EventKind::State,
        "completed" => EventKind::Completed,
        "error" => EventKind::Error,
        other => return Err(ParseError::UnknownKind(other.to_string())),
    };

    Ok(JobEvent {
        job_id: job_id.to_string(),
        kind,
        message: raw.message,
        progress: raw.progress,
        data: raw.data.unwrap_or_default(),
        ts: raw.ts.and_then(chrono::DateTime::from_timestamp_millis),
    })
}
