//! REST client for the darkroom controller HTTP endpoints.
//!
//! Wraps job submission, the identity-scoped job list, signed-URL
//! resolution, and the wait-time/pool-status probes using [`reqwest`].
//! Every request carries the client identity as both a header and a
//! cookie, matching what the controller accepts.

use std::sync::Arc;

use serde::Deserialize;

use darkroom_core::job::JobRecord;
use darkroom_core::naming::safe_filename;
use darkroom_core::types::JobId;

use crate::identity::{CLIENT_ID_COOKIE, CLIENT_ID_HEADER};

/// Upload bodies are streamed in chunks of this size when a progress
/// callback is attached.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Callback receiving whole-percent upload progress (0-100). Advisory
/// only; not part of the job state machine.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// HTTP client for one controller, bound to one client identity.
pub struct ControllerApi {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

/// Response returned by the controller's job submission endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned job identifier.
    pub id: JobId,
    /// Initial status as reported by the server. Stored as-is; the
    /// client acts on whatever came back instead of assuming `queued`.
    pub status: String,
}

/// Response from the wait-time estimate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitTimeResponse {
    #[serde(default)]
    pub estimated_sec: u64,
    #[serde(default)]
    pub avg_job_sec: u64,
    #[serde(default)]
    pub queued_jobs: u32,
    #[serde(default)]
    pub active_jobs: u32,
    #[serde(default)]
    pub capacity: u32,
}

/// Worker-pool summary; the ambient counters behind the local ETA
/// fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub workers_online: u32,
    #[serde(default)]
    pub active_jobs: u32,
    #[serde(default)]
    pub total_capacity: u32,
    #[serde(default)]
    pub queued_jobs: u32,
}

/// Which of a job's assets a signed URL is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Input,
    Output,
}

impl LocatorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MyJobsResponse {
    #[serde(default)]
    items: Vec<JobRecord>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: String,
}

/// Errors from the controller REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The controller returned a non-2xx status code.
    #[error("Controller error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ControllerApi {
    /// Create an API client for a controller.
    ///
    /// * `base_url`  - Base HTTP URL, e.g. `http://host:8002`, no
    ///   trailing slash.
    /// * `client_id` - The persisted client identity attached to every
    ///   request.
    pub fn new(base_url: String, client_id: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, client_id)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling, custom timeouts).
    pub fn with_client(client: reqwest::Client, base_url: String, client_id: String) -> Self {
        Self {
            client,
            base_url,
            client_id,
        }
    }

    /// The identity this client authenticates job ownership with.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The underlying HTTP client (shared with the stream transport).
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// URL of the server-push event stream for a job.
    pub fn events_url(&self, job_id: &str) -> String {
        format!("{}/api/jobs/{}/events", self.base_url, job_id)
    }

    /// Submit a job payload for processing.
    ///
    /// Sends a `POST /api/jobs` multipart request with the binary
    /// payload. When `progress` is given the body is streamed in chunks
    /// and the callback receives whole-percent byte progress strictly
    /// before the server responds. Returns the server-assigned id and
    /// initial status. No automatic retry on failure.
    pub async fn submit_job(
        &self,
        payload: Vec<u8>,
        filename: &str,
        content_type: &str,
        progress: Option<ProgressFn>,
    ) -> Result<SubmitResponse, ApiError> {
        let filename = safe_filename(filename);
        let total = payload.len() as u64;

        let part = match progress {
            Some(callback) => reqwest::multipart::Part::stream_with_length(
                reqwest::Body::wrap_stream(progress_stream(payload, callback)),
                total,
            ),
            None => reqwest::multipart::Part::bytes(payload),
        };
        let part = part.file_name(filename).mime_str(content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .request(reqwest::Method::POST, "/api/jobs")
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List this identity's most recent jobs, newest first.
    pub async fn my_jobs(&self, limit: u32) -> Result<Vec<JobRecord>, ApiError> {
        let response = self
            .request(reqwest::Method::GET, "/api/my/jobs")
            .query(&[("limit", limit)])
            .send()
            .await?;

        let parsed: MyJobsResponse = Self::parse_response(response).await?;
        Ok(parsed.items)
    }

    /// Resolve a signed, time-limited URL for one of a job's assets.
    pub async fn signed_url(&self, job_id: &str, kind: LocatorKind) -> Result<String, ApiError> {
        let response = self
            .request(reqwest::Method::GET, "/api/my/signed_url")
            .query(&[("job_id", job_id), ("kind", kind.as_str())])
            .send()
            .await?;

        let parsed: SignedUrlResponse = Self::parse_response(response).await?;
        Ok(parsed.url)
    }

    /// Fetch the controller's wait-time estimate.
    pub async fn wait_time(&self) -> Result<WaitTimeResponse, ApiError> {
        let response = self
            .request(reqwest::Method::GET, "/api/wait_time")
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Fetch the worker-pool summary.
    pub async fn pool_status(&self) -> Result<PoolStatus, ApiError> {
        let response = self
            .request(reqwest::Method::GET, "/api/gpu_status")
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Build a request with the identity header and cookie attached.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(CLIENT_ID_HEADER, &self.client_id)
            .header(
                reqwest::header::COOKIE,
                format!("{}={}", CLIENT_ID_COOKIE, self.client_id),
            )
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Api`] with the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Chunk a payload into a byte stream that reports whole-percent
/// progress as each chunk is handed to the transport.
fn progress_stream(
    payload: Vec<u8>,
    callback: ProgressFn,
) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> {
    let total = payload.len().max(1);
    let mut sent = 0usize;
    let mut last_reported: Option<u8> = None;

    let staged: Vec<(Vec<u8>, Option<u8>)> = payload
        .chunks(UPLOAD_CHUNK_BYTES)
        .map(|chunk| {
            sent += chunk.len();
            let percent = ((sent * 100) / total) as u8;
            let report = if last_reported != Some(percent) {
                last_reported = Some(percent);
                Some(percent)
            } else {
                None
            };
            (chunk.to_vec(), report)
        })
        .collect();

    futures::stream::iter(staged.into_iter().map(move |(chunk, percent)| {
        if let Some(p) = percent {
            callback(p);
        }
        Ok(chunk)
    }))
}
