//! Pseudo-anonymous client identity provisioning.
//!
//! The controller scopes "my jobs" queries by a client-chosen identifier.
//! [`IdentityStore`] mints one lazily on first use and keeps it in two
//! independent files under the state directory: the primary store and a
//! cookie mirror (the same value is sent as the `cid` cookie, so either
//! copy can survive the other being wiped). Both copies are rewritten on
//! every read so they never diverge. There is no reset operation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;

/// Header carrying the client identity on every controller request.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Cookie name mirroring the identity, matching what the controller
/// reads as a fallback when the header is missing.
pub const CLIENT_ID_COOKIE: &str = "cid";

/// Primary store filename under the state directory.
const CLIENT_ID_FILE: &str = "client_id";

/// Cookie-mirror filename under the state directory.
const COOKIE_MIRROR_FILE: &str = "cid_cookie";

/// Longest identity string accepted from disk; anything bigger is junk.
const MAX_ID_LEN: usize = 64;

/// Persistent provider of the client identity string.
pub struct IdentityStore {
    state_dir: PathBuf,
    cached: Mutex<Option<String>>,
}

impl IdentityStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            cached: Mutex::new(None),
        }
    }

    /// Return the client identity, creating and persisting one if absent.
    ///
    /// Idempotent: repeat calls return the same string. When the state
    /// directory is unusable the id degrades to in-memory for the
    /// process lifetime; that is logged, not an error.
    pub fn ensure_client_id(&self) -> String {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(id) = cached.as_ref() {
            let id = id.clone();
            drop(cached);
            self.persist_both(&id);
            return id;
        }

        let id = self
            .load_existing()
            .unwrap_or_else(|| {
                let id = mint_id();
                tracing::info!(client_id = %id, "Minted new client identity");
                id
            });

        *cached = Some(id.clone());
        drop(cached);
        self.persist_both(&id);
        id
    }

    /// Read the primary store, then the cookie mirror.
    fn load_existing(&self) -> Option<String> {
        read_id(&self.primary_path()).or_else(|| read_id(&self.mirror_path()))
    }

    /// Rewrite both copies. Persistence failure downgrades to a warning;
    /// the in-memory id keeps the session working.
    fn persist_both(&self, id: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.state_dir) {
            tracing::warn!(
                dir = %self.state_dir.display(),
                error = %e,
                "Cannot create state directory, identity is in-memory only",
            );
            return;
        }
        for path in [self.primary_path(), self.mirror_path()] {
            if let Err(e) = std::fs::write(&path, id) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist client identity");
            }
        }
    }

    fn primary_path(&self) -> PathBuf {
        self.state_dir.join(CLIENT_ID_FILE)
    }

    fn mirror_path(&self) -> PathBuf {
        self.state_dir.join(COOKIE_MIRROR_FILE)
    }
}

/// Read and validate an identity file.
fn read_id(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let id = raw.trim();
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return None;
    }
    Some(id.to_string())
}

/// Mint a fresh identity: UUIDv4 normally, or a timestamp-plus-digits
/// fallback if the platform RNG refuses (the uuid constructor aborts by
/// panicking in that case).
fn mint_id() -> String {
    std::panic::catch_unwind(|| uuid::Uuid::new_v4().to_string())
        .unwrap_or_else(|_| fallback_id())
}

/// Low-entropy identity for RNG-less environments.
fn fallback_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let digits: u32 = rand::rng().random_range(0..1_000_000);
    format!("{millis}-{digits:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_calls_return_the_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let first = store.ensure_client_id();
        let second = store.ensure_client_id();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn both_stores_hold_the_same_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let id = store.ensure_client_id();

        let primary = std::fs::read_to_string(dir.path().join(CLIENT_ID_FILE)).unwrap();
        let mirror = std::fs::read_to_string(dir.path().join(COOKIE_MIRROR_FILE)).unwrap();
        assert_eq!(primary, id);
        assert_eq!(mirror, id);
    }

    #[test]
    fn id_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let first = IdentityStore::new(dir.path()).ensure_client_id();
        let second = IdentityStore::new(dir.path()).ensure_client_id();
        assert_eq!(first, second);
    }

    #[test]
    fn mirror_restores_a_wiped_primary() {
        let dir = tempfile::tempdir().unwrap();
        let id = IdentityStore::new(dir.path()).ensure_client_id();

        std::fs::remove_file(dir.path().join(CLIENT_ID_FILE)).unwrap();

        let store = IdentityStore::new(dir.path());
        assert_eq!(store.ensure_client_id(), id);
        // The primary copy was written back.
        let primary = std::fs::read_to_string(dir.path().join(CLIENT_ID_FILE)).unwrap();
        assert_eq!(primary, id);
    }

    #[test]
    fn junk_on_disk_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLIENT_ID_FILE), "   ").unwrap();
        std::fs::write(dir.path().join(COOKIE_MIRROR_FILE), "x".repeat(500)).unwrap();

        let id = IdentityStore::new(dir.path()).ensure_client_id();
        assert!(!id.trim().is_empty());
        assert!(id.len() <= MAX_ID_LEN);
    }

    #[test]
    fn unusable_directory_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("not-a-dir");
        std::fs::write(&blocked, "file in the way").unwrap();

        let store = IdentityStore::new(blocked.join("sub"));
        let first = store.ensure_client_id();
        let second = store.ensure_client_id();
        assert_eq!(first, second);
    }

    #[test]
    fn fallback_id_shape() {
        let id = fallback_id();
        let (millis, digits) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(digits.len(), 6);
    }

    #[test]
    fn minted_id_is_uuid_formatted() {
        let id = mint_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
