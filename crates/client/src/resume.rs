//! Startup state reconciliation.
//!
//! On client start (or an explicit refresh) the identity's most recent
//! job decides what happens: a completed job gets its output resolved, an
//! in-flight job gets its subscription and ETA tracking reattached, and
//! everything else means idle. Resume must never block or fail a page
//! load, so every error is swallowed into the idle outcome.

use darkroom_core::job::{JobState, JobStatus, OutputLocator};
use darkroom_core::types::JobId;

use crate::api::{ApiError, LocatorKind};
use crate::subscription::JobEventClient;

/// What resume found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No jobs, or the latest one is failed/canceled/unknown.
    Idle,
    /// The latest job already finished; output was resolved when
    /// possible and no subscription was opened.
    Completed {
        job_id: JobId,
        /// `None` when signed-URL resolution failed; the caller hides
        /// the download action instead of erroring.
        output_url: Option<String>,
    },
    /// The latest job is still in flight; its subscription was
    /// reattached and state approximated from the status.
    Reattached { job_id: JobId },
}

impl JobEventClient {
    /// Reconcile client state with the controller.
    ///
    /// Never returns an error and never panics: any failure along the
    /// way logs a warning and lands on [`ResumeOutcome::Idle`].
    pub async fn resume(&self) -> ResumeOutcome {
        match self.try_resume().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Resume failed, starting idle");
                ResumeOutcome::Idle
            }
        }
    }

    async fn try_resume(&self) -> Result<ResumeOutcome, ApiError> {
        let jobs = self.api.my_jobs(self.config.my_jobs_limit).await?;

        // Newest first; only the latest job drives the decision.
        let Some(latest) = jobs.first() else {
            tracing::debug!("No previous jobs for this identity");
            return Ok(ResumeOutcome::Idle);
        };

        match latest.status() {
            Some(JobStatus::Completed) => {
                let storage_path = latest.output_path().map(str::to_string);
                Ok(self.resume_completed(latest.id.clone(), storage_path).await)
            }
            Some(status @ (JobStatus::Queued | JobStatus::Processing)) => {
                tracing::info!(job_id = %latest.id, status = %latest.status, "Reattaching to in-flight job");
                self.lock_states()
                    .insert(latest.id.clone(), JobState::from_status(latest.id.clone(), status));
                self.subscribe(&latest.id).await;
                Ok(ResumeOutcome::Reattached {
                    job_id: latest.id.clone(),
                })
            }
            Some(JobStatus::Failed | JobStatus::Canceled) => {
                tracing::debug!(job_id = %latest.id, status = %latest.status, "Latest job is terminal, staying idle");
                Ok(ResumeOutcome::Idle)
            }
            None => {
                tracing::warn!(job_id = %latest.id, status = %latest.status, "Latest job has an unknown status, staying idle");
                Ok(ResumeOutcome::Idle)
            }
        }
    }

    /// Record a completed job and resolve its output. A failed signed-URL
    /// lookup degrades to the storage path (if listed) and no URL; it
    /// never fails the resume.
    async fn resume_completed(&self, job_id: JobId, storage_path: Option<String>) -> ResumeOutcome {
        let mut state = JobState::from_status(job_id.clone(), JobStatus::Completed);

        let output_url = match self.api.signed_url(&job_id, LocatorKind::Output).await {
            Ok(url) => {
                state.output = Some(OutputLocator::Url(url.clone()));
                Some(url)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Could not resolve output URL, download stays unavailable",
                );
                state.output = storage_path.map(OutputLocator::StoragePath);
                None
            }
        };

        self.lock_states().insert(job_id.clone(), state);
        // Terminal: no subscription, no further events expected.
        ResumeOutcome::Completed { job_id, output_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[tokio::test]
    async fn unreachable_controller_resumes_idle() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::default()
            .with_base_url("http://127.0.0.1:1")
            .with_state_dir(dir.path());
        let client = JobEventClient::connect(config).unwrap();

        let outcome = client.resume().await;
        assert_eq!(outcome, ResumeOutcome::Idle);
        // No subscription was opened and no state invented.
        assert!(client.subscriptions.lock().await.is_empty());
        client.shutdown().await;
    }
}
