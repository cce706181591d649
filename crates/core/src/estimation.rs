//! Wait-time estimation constants and pure math.
//!
//! The controller's `/api/wait_time` endpoint is the primary ETA source.
//! When it is unreachable the client computes the same formula locally
//! from ambient pool counters (queued, active, capacity), and when even
//! those are unavailable it falls back to a fixed default.

use serde::Serialize;

/// Average seconds per job assumed when no recent average is known.
/// Matches the controller's default.
pub const DEFAULT_JOB_SECS: u64 = 75;

/// A pool always counts as having at least one worker slot, so the
/// estimate stays finite when no worker has registered yet.
pub const MIN_CAPACITY: u32 = 1;

// ---------------------------------------------------------------------------
// EstimateSource
// ---------------------------------------------------------------------------

/// Where an ETA figure came from, so the UI can qualify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    /// The controller's wait-time endpoint answered.
    Server,
    /// Computed locally from pool counters.
    LocalFallback,
    /// Fixed default; nothing else was reachable.
    Default,
}

// ---------------------------------------------------------------------------
// Estimation logic
// ---------------------------------------------------------------------------

/// Estimate the wait until a newly queued job finishes.
///
/// `(queued + active) / capacity` rounds up to whole jobs ahead per slot,
/// times the average job duration. Capacity is clamped to
/// [`MIN_CAPACITY`].
pub fn estimate_wait_secs(queued: u32, active: u32, capacity: u32, avg_job_secs: u64) -> u64 {
    let capacity = capacity.max(MIN_CAPACITY) as u64;
    let ahead = (queued + active) as u64;
    ahead.div_ceil(capacity) * avg_job_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_means_no_wait() {
        assert_eq!(estimate_wait_secs(0, 0, 2, DEFAULT_JOB_SECS), 0);
    }

    #[test]
    fn single_slot_serializes_the_queue() {
        assert_eq!(estimate_wait_secs(3, 1, 1, 60), 240);
    }

    #[test]
    fn capacity_divides_the_backlog() {
        assert_eq!(estimate_wait_secs(3, 1, 2, 60), 120);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(estimate_wait_secs(2, 0, 0, 75), 150);
    }

    #[test]
    fn partial_slots_round_up() {
        // 5 ahead on 2 slots is 3 rounds, not 2.5.
        assert_eq!(estimate_wait_secs(5, 0, 2, 10), 30);
    }
}
