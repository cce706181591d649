use std::path::PathBuf;
use std::time::Duration;

/// Client configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Controller base URL (default: `http://localhost:8002`).
    pub base_url: String,
    /// Directory for persisted client state, i.e. the identity files
    /// (default: `$HOME/.darkroom`, falling back to `./.darkroom`).
    pub state_dir: PathBuf,
    /// How many recent jobs to fetch during resume (default: `10`).
    pub my_jobs_limit: u32,
    /// Interval between wait-time refreshes for in-flight jobs
    /// (default: `15` seconds).
    pub eta_interval: Duration,
    /// Close an event channel that has stayed silent this long
    /// (default: `300` seconds). Bounds concurrently open transports.
    pub idle_ceiling: Duration,
    /// Per-request HTTP timeout for the REST calls (default: `30`
    /// seconds). Does not apply to the long-lived event stream.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                  |
    /// |-------------------------------|--------------------------|
    /// | `DARKROOM_BASE_URL`           | `http://localhost:8002`  |
    /// | `DARKROOM_STATE_DIR`          | `$HOME/.darkroom`        |
    /// | `DARKROOM_MY_JOBS_LIMIT`      | `10`                     |
    /// | `DARKROOM_ETA_INTERVAL_SECS`  | `15`                     |
    /// | `DARKROOM_IDLE_CEILING_SECS`  | `300`                    |
    /// | `DARKROOM_REQUEST_TIMEOUT_SECS` | `30`                   |
    pub fn from_env() -> Self {
        let base_url = std::env::var("DARKROOM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8002".into());

        let state_dir = std::env::var("DARKROOM_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_state_dir());

        let my_jobs_limit: u32 = std::env::var("DARKROOM_MY_JOBS_LIMIT")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("DARKROOM_MY_JOBS_LIMIT must be a valid u32");

        let eta_interval_secs: u64 = std::env::var("DARKROOM_ETA_INTERVAL_SECS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .expect("DARKROOM_ETA_INTERVAL_SECS must be a valid u64");

        let idle_ceiling_secs: u64 = std::env::var("DARKROOM_IDLE_CEILING_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("DARKROOM_IDLE_CEILING_SECS must be a valid u64");

        let request_timeout_secs: u64 = std::env::var("DARKROOM_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("DARKROOM_REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            base_url,
            state_dir,
            my_jobs_limit,
            eta_interval: Duration::from_secs(eta_interval_secs),
            idle_ceiling: Duration::from_secs(idle_ceiling_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    /// Override the controller URL. Trailing slashes are stripped so
    /// path joining stays predictable.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut url = base_url.into();
        while url.ends_with('/') {
            url.pop();
        }
        self.base_url = url;
        self
    }

    /// Override the state directory (used by tests with a temp dir).
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".into(),
            state_dir: default_state_dir(),
            my_jobs_limit: 10,
            eta_interval: Duration::from_secs(15),
            idle_ceiling: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn default_state_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".darkroom"),
        _ => PathBuf::from(".darkroom"),
    }
}
