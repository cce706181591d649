//! Job model and the client-side view of a job's lifecycle.
//!
//! The controller owns job state; the client never invents a transition.
//! [`JobState::apply`] folds inbound events into a derived view under two
//! hard rules: status only moves forward (`queued < processing <
//! terminal`), and nothing changes after a terminal status. Everything
//! else (progress, queue position, HUD phase) is advisory display state.

use serde::{Deserialize, Serialize};

use crate::job_events::{EventKind, JobEvent};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Progress milestones
// ---------------------------------------------------------------------------

/// Progress the controller reports when a job is enqueued.
pub const PROGRESS_QUEUED: u8 = 1;
/// Progress the controller reports when a worker picks the job up.
pub const PROGRESS_PROCESSING: u8 = 40;
/// Progress on completion.
pub const PROGRESS_DONE: u8 = 100;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Authoritative job status as tracked by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Cancelled server-side (admin operation); terminal like `Failed`.
    Canceled,
}

impl JobStatus {
    /// Parse a status string from the controller.
    ///
    /// Returns `None` for values this client does not know, so callers can
    /// degrade instead of failing on a newer server.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Position in the one-way lifecycle order. Terminal statuses share
    /// the highest rank; no event may move a job to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Canceled => 2,
        }
    }

    /// `true` once no further status-changing events are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// A job row as returned by the controller's list/detail endpoints.
///
/// The controller stores jobs as flat string hashes, so most fields
/// default to empty rather than being absent. Accessors expose the
/// cleaned-up view.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub input_path: String,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub started_at_ms: i64,
    #[serde(default)]
    pub finished_at_ms: i64,
    #[serde(default)]
    pub processing_ms: i64,
    #[serde(default)]
    pub error: String,
}

impl JobRecord {
    /// Parsed status, `None` if the server sent something unknown.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// Output storage path, present only once the job completed.
    pub fn output_path(&self) -> Option<&str> {
        if self.output_path.is_empty() {
            None
        } else {
            Some(&self.output_path)
        }
    }

    /// Input storage path, if the server returned one.
    pub fn input_path(&self) -> Option<&str> {
        if self.input_path.is_empty() {
            None
        } else {
            Some(&self.input_path)
        }
    }

    /// Creation time, if the server returned one.
    pub fn created_at(&self) -> Option<Timestamp> {
        if self.created_at_ms > 0 {
            chrono::DateTime::from_timestamp_millis(self.created_at_ms)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// HUD pipeline step derived for display.
///
/// Derivation precedence: an explicit `data.phase` on the event wins;
/// otherwise the status transition decides; message-text matching is kept
/// only for servers that predate the explicit field. A phase never moves
/// backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Rendering,
    Finalizing,
    Done,
    Failed,
}

impl Phase {
    /// Parse an explicit phase string from the event contract.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "rendering" => Some(Self::Rendering),
            "finalizing" => Some(Self::Finalizing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Forward-only ordering used when folding phases.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Rendering => 1,
            Self::Finalizing => 2,
            Self::Done | Self::Failed => 3,
        }
    }

    /// Legacy fallback: guess a phase from the server's free-text message.
    ///
    /// Fragile coupling to human wording; only consulted when the event
    /// carries neither an explicit phase nor a status-changing meaning.
    fn from_message(message: &str) -> Option<Self> {
        let lower = message.to_lowercase();
        if lower.contains("finaliz") || lower.contains("upload") {
            Some(Self::Finalizing)
        } else if lower.contains("processing") {
            Some(Self::Rendering)
        } else if lower.contains("queue") {
            Some(Self::Queued)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// OutputLocator
// ---------------------------------------------------------------------------

/// How to reach a finished job's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLocator {
    /// A signed, time-limited URL.
    Url(String),
    /// A storage path that still needs resolving through the signed-URL
    /// endpoint before it can be fetched.
    StoragePath(String),
    /// Bytes delivered inline on the event stream.
    Inline {
        data: Vec<u8>,
        content_type: String,
    },
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Result of folding one event into a [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event changed (or refreshed) the derived state.
    Advanced,
    /// The event described an earlier lifecycle stage and was dropped.
    IgnoredStale,
    /// The job was already terminal; the event was dropped.
    IgnoredAfterTerminal,
}

/// Client-side derived view of one job.
#[derive(Debug, Clone)]
pub struct JobState {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: Phase,
    pub progress: Option<u8>,
    pub queue_position: Option<u32>,
    pub output: Option<OutputLocator>,
    pub error: Option<String>,
}

impl JobState {
    /// Fresh state for a just-submitted job, seeded with whatever status
    /// the server returned (never assumed to be `queued`).
    pub fn new(job_id: impl Into<JobId>, status: JobStatus) -> Self {
        let mut state = Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            phase: Phase::Queued,
            progress: None,
            queue_position: None,
            output: None,
            error: None,
        };
        state.force_status(status);
        state
    }

    /// Reconstruct an approximate view from a bare status, for resume:
    /// no event history is replayed, so phase and progress are derived
    /// from the controller's canonical milestones alone.
    pub fn from_status(job_id: impl Into<JobId>, status: JobStatus) -> Self {
        Self::new(job_id, status)
    }

    /// Fold one inbound event into the derived state.
    pub fn apply(&mut self, event: &JobEvent) -> Applied {
        if self.status.is_terminal() {
            return Applied::IgnoredAfterTerminal;
        }

        match event.kind {
            EventKind::Completed => {
                self.force_status(JobStatus::Completed);
                self.queue_position = None;
                self.output = output_from_event(event);
                Applied::Advanced
            }
            EventKind::Error => {
                self.force_status(JobStatus::Failed);
                self.queue_position = None;
                self.error = event.message.clone();
                Applied::Advanced
            }
            EventKind::State | EventKind::Info => self.apply_progressive(event),
        }
    }

    /// Handle `state`/`info` events: advance status if the event implies a
    /// later stage, refuse to move backward, and refresh advisory fields.
    fn apply_progressive(&mut self, event: &JobEvent) -> Applied {
        if let Some(next) = status_implied_by(event) {
            if next.rank() < self.status.rank() {
                return Applied::IgnoredStale;
            }
            if next.rank() > self.status.rank() {
                self.force_status(next);
            }
        }

        // Advisory display fields: explicit phase beats text matching,
        // and neither may move the phase backward.
        let hinted = event
            .data
            .phase
            .as_deref()
            .and_then(Phase::parse)
            .or_else(|| event.message.as_deref().and_then(Phase::from_message));
        if let Some(phase) = hinted {
            if phase.rank() > self.phase.rank() {
                self.phase = phase;
            }
        }
        if let Some(p) = event.progress {
            self.progress = Some(self.progress.map_or(p, |cur| cur.max(p)));
        }
        if let Some(pos) = event.data.queue_position {
            self.queue_position = Some(pos);
        }
        Applied::Advanced
    }

    /// Set the status and the display fields it canonically implies.
    fn force_status(&mut self, status: JobStatus) {
        self.status = status;
        match status {
            JobStatus::Queued => {
                self.phase = Phase::Queued;
                self.progress = Some(self.progress.map_or(PROGRESS_QUEUED, |p| p.max(PROGRESS_QUEUED)));
            }
            JobStatus::Processing => {
                if self.phase.rank() < Phase::Rendering.rank() {
                    self.phase = Phase::Rendering;
                }
                self.progress =
                    Some(self.progress.map_or(PROGRESS_PROCESSING, |p| p.max(PROGRESS_PROCESSING)));
            }
            JobStatus::Completed => {
                self.phase = Phase::Done;
                self.progress = Some(PROGRESS_DONE);
            }
            JobStatus::Failed | JobStatus::Canceled => {
                self.phase = Phase::Failed;
            }
        }
    }
}

/// Status a `state`/`info` event implies, if any.
///
/// An explicit `data.phase` is checked first; the message-substring match
/// reproduces the legacy contract with the controller's wording.
fn status_implied_by(event: &JobEvent) -> Option<JobStatus> {
    if let Some(phase) = event.data.phase.as_deref().and_then(Phase::parse) {
        return Some(match phase {
            Phase::Queued => JobStatus::Queued,
            Phase::Rendering | Phase::Finalizing => JobStatus::Processing,
            Phase::Done => JobStatus::Completed,
            Phase::Failed => JobStatus::Failed,
        });
    }

    let message = event.message.as_deref()?.to_lowercase();
    if message.contains("cancel") {
        Some(JobStatus::Canceled)
    } else if message.contains("processing") {
        Some(JobStatus::Processing)
    } else if message.contains("queue") {
        Some(JobStatus::Queued)
    } else {
        None
    }
}

/// Extract the output locator from a `completed` event.
fn output_from_event(event: &JobEvent) -> Option<OutputLocator> {
    if let Some(url) = &event.data.output_url {
        Some(OutputLocator::Url(url.clone()))
    } else {
        event
            .data
            .output_path
            .as_ref()
            .map(|p| OutputLocator::StoragePath(p.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_events::EventData;

    fn state_event(message: &str) -> JobEvent {
        JobEvent::new("j1", EventKind::State).with_message(message)
    }

    fn completed_event(url: &str) -> JobEvent {
        JobEvent::new("j1", EventKind::Completed).with_data(EventData {
            output_url: Some(url.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn status_parse_known_and_unknown() {
        assert_eq!(JobStatus::parse("queued"), Some(JobStatus::Queued));
        assert_eq!(JobStatus::parse("canceled"), Some(JobStatus::Canceled));
        assert_eq!(JobStatus::parse("archived"), None);
    }

    #[test]
    fn submit_then_process_then_complete() {
        let mut state = JobState::new("j1", JobStatus::Queued);
        assert_eq!(state.phase, Phase::Queued);

        assert_eq!(state.apply(&state_event("now processing")), Applied::Advanced);
        assert_eq!(state.status, JobStatus::Processing);
        assert_eq!(state.phase, Phase::Rendering);

        assert_eq!(
            state.apply(&completed_event("https://cdn.example/out.jpg")),
            Applied::Advanced
        );
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, Some(PROGRESS_DONE));
        assert_eq!(
            state.output,
            Some(OutputLocator::Url("https://cdn.example/out.jpg".into()))
        );
    }

    #[test]
    fn status_never_moves_backward() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        // A late "queued" state event must not regress the status.
        assert_eq!(state.apply(&state_event("job queued")), Applied::IgnoredStale);
        assert_eq!(state.status, JobStatus::Processing);
    }

    #[test]
    fn terminal_state_ignores_further_events() {
        let mut state = JobState::new("j1", JobStatus::Queued);
        state.apply(&completed_event("https://cdn.example/out.jpg"));

        let late = state_event("now processing");
        assert_eq!(state.apply(&late), Applied::IgnoredAfterTerminal);
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.phase, Phase::Done);
    }

    #[test]
    fn error_event_is_terminal_and_records_message() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        let err = JobEvent::new("j1", EventKind::Error).with_message("worker died");
        assert_eq!(state.apply(&err), Applied::Advanced);
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("worker died"));

        // Nothing changes afterwards, not even a completion.
        assert_eq!(
            state.apply(&completed_event("https://late.example/out.jpg")),
            Applied::IgnoredAfterTerminal
        );
        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.output.is_none());
    }

    #[test]
    fn cancel_state_event_is_terminal() {
        let mut state = JobState::new("j1", JobStatus::Queued);
        assert_eq!(state.apply(&state_event("canceled")), Applied::Advanced);
        assert_eq!(state.status, JobStatus::Canceled);
        assert!(state.status.is_terminal());
    }

    #[test]
    fn explicit_phase_beats_message_text() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        let event = JobEvent::new("j1", EventKind::State)
            .with_message("processing")
            .with_data(EventData {
                phase: Some("finalizing".into()),
                ..Default::default()
            });
        state.apply(&event);
        assert_eq!(state.phase, Phase::Finalizing);
    }

    #[test]
    fn message_fallback_derives_phase() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        state.apply(&state_event("uploading result"));
        assert_eq!(state.phase, Phase::Finalizing);
    }

    #[test]
    fn phase_never_moves_backward() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        state.apply(&state_event("finalizing output"));
        assert_eq!(state.phase, Phase::Finalizing);

        // A repeated "processing" message must not drop the phase back.
        state.apply(&state_event("still processing"));
        assert_eq!(state.phase, Phase::Finalizing);
    }

    #[test]
    fn queue_position_tracked_from_info_events() {
        let mut state = JobState::new("j1", JobStatus::Queued);
        let queued = JobEvent::new("j1", EventKind::Info)
            .with_message("job queued")
            .with_progress(PROGRESS_QUEUED)
            .with_data(EventData {
                queue_position: Some(4),
                capacity: Some(2),
                ..Default::default()
            });
        state.apply(&queued);
        assert_eq!(state.queue_position, Some(4));
        assert_eq!(state.status, JobStatus::Queued);
    }

    #[test]
    fn progress_is_monotonic() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        assert_eq!(state.progress, Some(PROGRESS_PROCESSING));
        let low = JobEvent::new("j1", EventKind::State)
            .with_message("processing")
            .with_progress(10);
        state.apply(&low);
        assert_eq!(state.progress, Some(PROGRESS_PROCESSING));
    }

    #[test]
    fn from_status_seeds_resume_view() {
        let processing = JobState::from_status("j1", JobStatus::Processing);
        assert_eq!(processing.phase, Phase::Rendering);
        assert_eq!(processing.progress, Some(PROGRESS_PROCESSING));

        let done = JobState::from_status("j2", JobStatus::Completed);
        assert_eq!(done.phase, Phase::Done);
        assert_eq!(done.progress, Some(PROGRESS_DONE));
        assert!(done.output.is_none());
    }

    #[test]
    fn completed_without_url_keeps_storage_path() {
        let mut state = JobState::new("j1", JobStatus::Processing);
        let event = JobEvent::new("j1", EventKind::Completed).with_data(EventData {
            output_path: Some("jobs/j1/output/output.jpg".into()),
            ..Default::default()
        });
        state.apply(&event);
        assert_eq!(
            state.output,
            Some(OutputLocator::StoragePath("jobs/j1/output/output.jpg".into()))
        );
    }

    #[test]
    fn job_record_accessors() {
        let json = r#"{
            "id": "abc123",
            "status": "completed",
            "filename": "selfie.jpg",
            "output_path": "jobs/abc123/output/output.jpg",
            "created_at_ms": 1722500000000
        }"#;
        let record: JobRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status(), Some(JobStatus::Completed));
        assert_eq!(record.output_path(), Some("jobs/abc123/output/output.jpg"));
        assert!(record.input_path().is_none());
        assert!(record.created_at().is_some());
    }
}
