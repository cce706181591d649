//! Job event envelope shared by the transport and dispatch layers.
//!
//! The controller pushes flat JSON messages of the shape
//! `{"ts": <unix_ms>, "type": "<kind>", "message": "...", "progress": N,
//! "data": {...}}` over the per-job event stream. `darkroom-client`
//! deserializes them into a [`JobEvent`] and hands them to the state
//! machine and the listener router.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// The controller's event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Informational (job queued, requeued-after-error). Carries queue
    /// position and pool capacity on enqueue.
    Info,
    /// A lifecycle transition ("processing", "canceled", ...).
    State,
    /// Terminal success. Carries the output locator.
    Completed,
    /// Terminal failure.
    Error,
}

/// Structured payload attached to an event.
///
/// Every field is optional: the controller only sends what the event
/// warrants, and unknown fields are preserved in `extra` so newer server
/// versions do not break parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    /// Position in the execution queue (1-based), present on enqueue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,

    /// Total worker capacity at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,

    /// Retry count after a worker error requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Signed URL for the finished output, present on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,

    /// Storage path of the finished output (fallback when signing failed
    /// server-side and no URL could be attached).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Explicit pipeline sub-phase. When present it is authoritative for
    /// HUD step derivation; message text matching is only a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Forward-compatibility bucket for server fields we do not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One message delivered through a job subscription.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    /// The job this event belongs to (taken from the stream, not the wire).
    pub job_id: JobId,
    pub kind: EventKind,
    /// Human-readable description; free text owned by the server.
    pub message: Option<String>,
    /// Advisory completion percentage (0-100).
    pub progress: Option<u8>,
    pub data: EventData,
    /// Server-side emission time.
    pub ts: Option<Timestamp>,
}

impl JobEvent {
    /// Create an event with only the required fields.
    pub fn new(job_id: impl Into<JobId>, kind: EventKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            message: None,
            progress: None,
            data: EventData::default(),
            ts: None,
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a progress percentage.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_optional_fields() {
        let event = JobEvent::new("abc123", EventKind::State)
            .with_message("processing")
            .with_progress(40);
        assert_eq!(event.job_id, "abc123");
        assert_eq!(event.kind, EventKind::State);
        assert_eq!(event.message.as_deref(), Some("processing"));
        assert_eq!(event.progress, Some(40));
        assert!(event.data.queue_position.is_none());
    }

    #[test]
    fn event_data_keeps_unknown_fields() {
        let json = r#"{"queue_position":3,"capacity":2,"gpu_model":"A4000"}"#;
        let data: EventData = serde_json::from_str(json).unwrap();
        assert_eq!(data.queue_position, Some(3));
        assert_eq!(data.capacity, Some(2));
        assert_eq!(data.extra["gpu_model"], "A4000");
    }

    #[test]
    fn event_kind_parses_snake_case() {
        let kind: EventKind = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(kind, EventKind::Completed);
    }
}
