//! Top-level error taxonomy for the client.
//!
//! Layer-local errors (REST, stream transport, message parsing) live
//! next to their layer; this module holds the surface callers match on.
//! Failures are always scoped to one job's lifecycle: nothing here ever
//! propagates across jobs or tears down the whole client.

use crate::api::ApiError;
use crate::sse::SseError;

/// Errors surfaced by [`JobEventClient`](crate::JobEventClient) methods.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Job creation failed; the job was not created and the caller must
    /// not expect events for it. No automatic retry at this layer.
    #[error("Submission failed: {0}")]
    Submission(#[from] ApiError),

    /// Signed-URL resolution failed for a job asset. Callers degrade the
    /// affected action instead of failing the session.
    #[error("Could not resolve signed URL: {0}")]
    ResolveLocator(ApiError),

    /// The event stream could not be opened or died.
    #[error("Event stream error: {0}")]
    Transport(#[from] SseError),

    /// The client could not be constructed from its configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
