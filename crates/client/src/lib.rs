//! HTTP/SSE client for the darkroom job controller.
//!
//! Submits image-processing jobs, follows each job's server-push event
//! stream, fans events out to registered listeners, and reconciles state
//! after a restart. The controller owns all job state; this crate only
//! mirrors it.
//!
//! Entry point: [`JobEventClient::connect`] with a [`ClientConfig`].

pub mod api;
pub mod config;
pub mod error;
pub mod eta;
pub mod identity;
pub mod messages;
pub mod resume;
pub mod sse;
pub mod subscription;

pub use api::{ApiError, ControllerApi, LocatorKind, PoolStatus, SubmitResponse, WaitTimeResponse};
pub use config::ClientConfig;
pub use error::ClientError;
pub use eta::{Eta, EtaTracker};
pub use identity::IdentityStore;
pub use resume::ResumeOutcome;
pub use subscription::{JobEventClient, ProgressFn, ReconnectConfig};
