//! Periodic wait-time tracking for in-flight jobs.
//!
//! [`EtaTracker`] polls the controller's wait-time endpoint on a fixed
//! interval and publishes the latest figure over a
//! [`tokio::sync::watch`] channel. When the endpoint fails it computes
//! the same formula locally from pool counters; when even those are
//! unreachable it falls back to the fixed default. The task is tied to
//! its subscription's cancellation token, so it stops exactly when the
//! job goes terminal or the channel is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use darkroom_core::estimation::{estimate_wait_secs, EstimateSource, DEFAULT_JOB_SECS};

use crate::api::ControllerApi;

/// A wait-time figure and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eta {
    pub seconds: u64,
    pub source: EstimateSource,
}

/// Background wait-time poller.
pub struct EtaTracker;

impl EtaTracker {
    /// Spawn the polling task. The receiver starts at the default
    /// estimate and updates every `interval` until `cancel` fires.
    pub fn spawn(
        api: Arc<ControllerApi>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> watch::Receiver<Eta> {
        let (tx, rx) = watch::channel(Eta {
            seconds: DEFAULT_JOB_SECS,
            source: EstimateSource::Default,
        });

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("ETA tracker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let eta = Self::refresh(&api).await;
                        if tx.send(eta).is_err() {
                            // Receiver gone; nobody cares anymore.
                            break;
                        }
                    }
                }
            }
        });

        rx
    }

    /// One refresh round: server estimate, then local fallback, then
    /// the fixed default.
    async fn refresh(api: &ControllerApi) -> Eta {
        match api.wait_time().await {
            Ok(wait) => Eta {
                seconds: wait.estimated_sec,
                source: EstimateSource::Server,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Wait-time endpoint failed, trying pool counters");
                match api.pool_status().await {
                    Ok(pool) => Eta {
                        seconds: estimate_wait_secs(
                            pool.queued_jobs,
                            pool.active_jobs,
                            pool.total_capacity,
                            DEFAULT_JOB_SECS,
                        ),
                        source: EstimateSource::LocalFallback,
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Pool status failed, using default estimate");
                        Eta {
                            seconds: DEFAULT_JOB_SECS,
                            source: EstimateSource::Default,
                        }
                    }
                }
            }
        }
    }
}
