//! Subscription management for per-job event streams.
//!
//! [`JobEventClient`] owns one supervision task per subscribed job id:
//! open the stream, pump frames through the state machine and the
//! listener router, and reconnect with bounded exponential backoff when
//! the transport drops. At most one channel is ever open per job id.
//! Everything shuts down through cancellation tokens: a master token for
//! the client, a child per subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use darkroom_core::job::{Applied, JobState, JobStatus};
use darkroom_core::job_events::{EventKind, JobEvent};
use darkroom_core::types::JobId;
use darkroom_events::dispatch::{EventRouter, Listener, ListenerGuard};

use crate::api::{ControllerApi, LocatorKind};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::eta::{Eta, EtaTracker};
use crate::identity::IdentityStore;
use crate::messages::parse_event;
use crate::sse::SseConnection;

pub use crate::api::ProgressFn;

/// Bound on waiting for a subscription task during close/shutdown.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Tunable parameters for the stream reconnection strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive failures after which the subscription gives up and
    /// surfaces a transport error to listeners.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

// ---------------------------------------------------------------------------
// JobEventClient
// ---------------------------------------------------------------------------

/// Client for the darkroom job controller: submission, per-job event
/// streams, listener fan-out, and restart reconciliation.
///
/// Created once per session via [`JobEventClient::connect`]; the
/// returned `Arc` is cheap to clone. Call
/// [`shutdown`](JobEventClient::shutdown) to tear the session down.
pub struct JobEventClient {
    pub(crate) api: Arc<ControllerApi>,
    /// HTTP client without a total-request timeout, for the long-lived
    /// event streams only.
    pub(crate) stream_http: reqwest::Client,
    pub(crate) router: Arc<EventRouter>,
    pub(crate) config: ClientConfig,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) states: Arc<StdMutex<HashMap<JobId, JobState>>>,
    /// Active subscriptions indexed by job id. The invariant: at most
    /// one open transport per job id, enforced here.
    pub(crate) subscriptions: Mutex<HashMap<JobId, SubscriptionHandle>>,
    /// Master cancellation token, cancelled during shutdown.
    pub(crate) cancel: CancellationToken,
}

/// Bookkeeping for one live subscription.
pub(crate) struct SubscriptionHandle {
    /// Child of the master token; cancelling stops the stream task and
    /// its ETA tracker together.
    cancel: CancellationToken,
    task: JoinHandle<()>,
    eta: watch::Receiver<Eta>,
}

impl JobEventClient {
    /// Build a client from configuration: provision the identity, set up
    /// the HTTP clients, and return a shared handle.
    pub fn connect(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let client_id = IdentityStore::new(&config.state_dir).ensure_client_id();

        let rest_http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        // The event stream stays open for the life of a job; only bound
        // the connect phase.
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        let api = ControllerApi::with_client(rest_http, config.base_url.clone(), client_id);

        tracing::info!(
            base_url = %config.base_url,
            client_id = %api.client_id(),
            "Job event client ready",
        );

        Ok(Arc::new(Self {
            api: Arc::new(api),
            stream_http,
            router: Arc::new(EventRouter::new()),
            config,
            reconnect: ReconnectConfig::default(),
            states: Arc::new(StdMutex::new(HashMap::new())),
            subscriptions: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }))
    }

    /// Override the reconnection strategy (mostly for tests).
    pub fn with_reconnect(mut self: Arc<Self>, reconnect: ReconnectConfig) -> Arc<Self> {
        if let Some(client) = Arc::get_mut(&mut self) {
            client.reconnect = reconnect;
        }
        self
    }

    /// Submit a payload as a new job and open its event subscription.
    ///
    /// The returned state is seeded with whatever status the server
    /// reported. On failure the job was not created; retrying is the
    /// caller's decision.
    pub async fn create_job(
        &self,
        payload: Vec<u8>,
        filename: &str,
        content_type: &str,
        progress: Option<ProgressFn>,
    ) -> Result<JobState, ClientError> {
        let response = self
            .api
            .submit_job(payload, filename, content_type, progress)
            .await?;

        let status = JobStatus::parse(&response.status).unwrap_or_else(|| {
            tracing::warn!(
                job_id = %response.id,
                status = %response.status,
                "Server returned an unknown job status, treating as queued",
            );
            JobStatus::Queued
        });

        tracing::info!(job_id = %response.id, status = %response.status, "Job created");

        let state = JobState::new(response.id.clone(), status);
        self.lock_states().insert(response.id.clone(), state.clone());

        if !status.is_terminal() {
            self.subscribe(&response.id).await;
        }
        Ok(state)
    }

    /// Open the event subscription for a job id.
    ///
    /// Reuses a live channel if one exists; a finished one is replaced.
    /// Never opens a second transport to the same job.
    pub async fn subscribe(&self, job_id: &str) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(existing) = subs.get(job_id) {
            if !existing.task.is_finished() {
                tracing::debug!(job_id, "Reusing existing event subscription");
                return;
            }
        }

        self.lock_states()
            .entry(job_id.to_string())
            .or_insert_with(|| JobState::from_status(job_id.to_string(), JobStatus::Queued));

        let cancel = self.cancel.child_token();
        let eta = EtaTracker::spawn(
            Arc::clone(&self.api),
            self.config.eta_interval,
            cancel.clone(),
        );

        let task = SubscriptionTask {
            api: Arc::clone(&self.api),
            stream_http: self.stream_http.clone(),
            router: Arc::clone(&self.router),
            states: Arc::clone(&self.states),
            job_id: job_id.to_string(),
            reconnect: self.reconnect.clone(),
            idle_ceiling: self.config.idle_ceiling,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        subs.insert(
            job_id.to_string(),
            SubscriptionHandle {
                cancel,
                task: handle,
                eta,
            },
        );
    }

    /// Register a listener for a job id. Events flow until the guard is
    /// unsubscribed or the subscription ends.
    pub fn on(&self, job_id: &str, listener: Listener) -> ListenerGuard {
        self.router.on(job_id, listener)
    }

    /// Snapshot of the derived state for a job, if tracked.
    pub fn state(&self, job_id: &str) -> Option<JobState> {
        self.lock_states().get(job_id).cloned()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve a fresh signed URL for one of a job's assets.
    ///
    /// Signed URLs expire, so callers re-resolve rather than cache. On
    /// failure the caller disables the affected action (a download
    /// button, a preview) and nothing else.
    pub async fn resolve_locator(
        &self,
        job_id: &str,
        kind: LocatorKind,
    ) -> Result<String, ClientError> {
        self.api
            .signed_url(job_id, kind)
            .await
            .map_err(ClientError::ResolveLocator)
    }

    /// Latest wait-time estimate for a subscribed job. The receiver
    /// updates on the configured interval until the job goes terminal.
    pub async fn eta(&self, job_id: &str) -> Option<watch::Receiver<Eta>> {
        self.subscriptions
            .lock()
            .await
            .get(job_id)
            .map(|handle| handle.eta.clone())
    }

    /// Explicitly close a job's subscription. No events are delivered
    /// afterwards, even ones already in flight on the transport.
    pub async fn close(&self, job_id: &str) {
        if let Some(handle) = self.subscriptions.lock().await.remove(job_id) {
            tracing::info!(job_id, "Closing event subscription");
            handle.cancel.cancel();
            let _ = tokio::time::timeout(TASK_DRAIN_TIMEOUT, handle.task).await;
        }
    }

    /// Tear the session down: stop every subscription and drop all
    /// listeners.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job event client");
        self.cancel.cancel();

        let mut subs = self.subscriptions.lock().await;
        for (job_id, handle) in subs.drain() {
            tracing::debug!(job_id = %job_id, "Stopping subscription task");
            let _ = tokio::time::timeout(TASK_DRAIN_TIMEOUT, handle.task).await;
        }

        self.router.dispose();
        tracing::info!("Job event client shut down complete");
    }

    pub(crate) fn lock_states(&self) -> MutexGuard<'_, HashMap<JobId, JobState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription task
// ---------------------------------------------------------------------------

/// Why the frame pump stopped.
enum PumpExit {
    /// The job reached a terminal status; the subscription is done.
    Terminal,
    /// Nothing arrived within the idle ceiling; channel closed to cap
    /// open transports.
    Idle,
    Cancelled,
    /// The transport ended or errored. `delivered` records whether any
    /// frame arrived on this connection, which resets the retry counter.
    Disconnected { delivered: bool },
}

struct SubscriptionTask {
    api: Arc<ControllerApi>,
    stream_http: reqwest::Client,
    router: Arc<EventRouter>,
    states: Arc<StdMutex<HashMap<JobId, JobState>>>,
    job_id: JobId,
    reconnect: ReconnectConfig,
    idle_ceiling: Duration,
    cancel: CancellationToken,
}

impl SubscriptionTask {
    /// Core subscription loop: connect, pump, reconnect with backoff,
    /// give up after `max_attempts` consecutive failures.
    async fn run(self) {
        let url = self.api.events_url(&self.job_id);
        let mut attempt = 0u32;
        let mut delay = self.reconnect.initial_delay;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match SseConnection::open(&self.stream_http, &url, self.api.client_id()).await {
                Ok(mut conn) => match self.pump(&mut conn).await {
                    PumpExit::Terminal => {
                        tracing::info!(job_id = %self.job_id, "Job reached terminal status, subscription done");
                        break;
                    }
                    PumpExit::Cancelled => break,
                    PumpExit::Idle => {
                        tracing::info!(
                            job_id = %self.job_id,
                            idle_secs = self.idle_ceiling.as_secs(),
                            "Closing idle event channel",
                        );
                        break;
                    }
                    PumpExit::Disconnected { delivered } => {
                        if delivered {
                            attempt = 0;
                            delay = self.reconnect.initial_delay;
                        }
                        tracing::warn!(job_id = %self.job_id, "Event stream disconnected");
                    }
                },
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Failed to open event stream");
                }
            }

            attempt += 1;
            if attempt >= self.reconnect.max_attempts {
                tracing::error!(
                    job_id = %self.job_id,
                    attempts = attempt,
                    "Giving up on event stream after repeated failures",
                );
                // Listeners get an explicit transport failure. The derived
                // job status is left alone: only the server decides job
                // outcomes, and this job may well still complete.
                let event = JobEvent::new(self.job_id.clone(), EventKind::Error)
                    .with_message("event stream unavailable after repeated reconnect failures");
                self.router.emit(&event);
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.reconnect);
        }

        // Stops the paired ETA tracker at the same instant, whatever the
        // exit path was.
        self.cancel.cancel();
    }

    /// Pump frames from one connection until it ends.
    async fn pump(&self, conn: &mut SseConnection) -> PumpExit {
        let mut delivered = false;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                next = tokio::time::timeout(self.idle_ceiling, conn.next_frame()) => next,
            };

            let frame = match next {
                Err(_elapsed) => return PumpExit::Idle,
                Ok(None) => return PumpExit::Disconnected { delivered },
                Ok(Some(Err(e))) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Event stream read error");
                    return PumpExit::Disconnected { delivered };
                }
                Ok(Some(Ok(frame))) => frame,
            };
            delivered = true;

            let event = match parse_event(&self.job_id, &frame.data) {
                Ok(event) => event,
                Err(e) => {
                    // A malformed message never takes the subscription
                    // down; skip it and keep reading.
                    tracing::warn!(
                        job_id = %self.job_id,
                        error = %e,
                        raw_message = %frame.data,
                        "Failed to parse stream event",
                    );
                    continue;
                }
            };

            let (applied, terminal) = {
                let mut states = match self.states.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let state = states
                    .entry(self.job_id.clone())
                    .or_insert_with(|| {
                        JobState::from_status(self.job_id.clone(), JobStatus::Queued)
                    });
                let applied = state.apply(&event);
                (applied, state.status.is_terminal())
            };

            // Events arriving after a terminal status are noise and are
            // not forwarded; everything else reaches the listeners.
            if !matches!(applied, Applied::IgnoredAfterTerminal) {
                self.router.emit(&event);
            }
            if terminal {
                return PumpExit::Terminal;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
