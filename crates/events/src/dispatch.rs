//! Per-job listener registry with snapshot-before-iterate delivery.
//!
//! Listeners register against a job id and receive every event routed for
//! that id. Delivery snapshots the listener list before invoking anyone,
//! so a listener may unsubscribe itself (or register others) from inside
//! its own callback without corrupting iteration or being delivered
//! twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use darkroom_core::job_events::JobEvent;
use darkroom_core::types::JobId;

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

struct Registered {
    token: u64,
    listener: Listener,
}

struct RouterInner {
    listeners: HashMap<JobId, Vec<Registered>>,
    next_token: u64,
}

/// Fan-out hub routing [`JobEvent`]s to the listeners registered for the
/// event's job id.
///
/// Cheap to share: clone the `Arc<EventRouter>` the client hands out.
/// Per-listener delivery order matches emit order; the order *across*
/// listeners of one event is unspecified.
pub struct EventRouter {
    inner: Arc<Mutex<RouterInner>>,
}

/// Handle for one registration. Call
/// [`unsubscribe`](ListenerGuard::unsubscribe) to remove exactly that
/// listener; dropping the guard leaves the listener registered, matching
/// the keep-the-unsubscribe-function contract.
pub struct ListenerGuard {
    inner: Weak<Mutex<RouterInner>>,
    job_id: JobId,
    token: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RouterInner {
                listeners: HashMap::new(),
                next_token: 0,
            })),
        }
    }

    /// Register a listener for a job id.
    ///
    /// Registering the *same* callback (`Arc` pointer identity) twice for
    /// the same job is a no-op: the returned guard refers to the existing
    /// registration and the listener will still be invoked once per event.
    pub fn on(&self, job_id: impl Into<JobId>, listener: Listener) -> ListenerGuard {
        let job_id = job_id.into();
        let mut inner = self.lock();

        let entries = inner.listeners.entry(job_id.clone()).or_default();
        if let Some(existing) = entries
            .iter()
            .find(|r| Arc::ptr_eq(&r.listener, &listener))
        {
            let token = existing.token;
            drop(inner);
            return ListenerGuard {
                inner: Arc::downgrade(&self.inner),
                job_id,
                token,
            };
        }

        inner.next_token += 1;
        let token = inner.next_token;
        inner
            .listeners
            .entry(job_id.clone())
            .or_default()
            .push(Registered { token, listener });

        ListenerGuard {
            inner: Arc::downgrade(&self.inner),
            job_id,
            token,
        }
    }

    /// Deliver an event to every listener currently registered for its
    /// job id. Returns how many listeners were invoked.
    pub fn emit(&self, event: &JobEvent) -> usize {
        // Snapshot under the lock, invoke outside it. Listeners mutating
        // the registry mid-dispatch see the next event, not this one.
        let snapshot: Vec<Listener> = {
            let inner = self.lock();
            match inner.listeners.get(&event.job_id) {
                Some(entries) => entries.iter().map(|r| Arc::clone(&r.listener)).collect(),
                None => Vec::new(),
            }
        };

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    /// Number of listeners currently registered for a job id.
    pub fn listener_count(&self, job_id: &str) -> usize {
        self.lock().listeners.get(job_id).map_or(0, Vec::len)
    }

    /// Drop all listeners for one job id.
    pub fn clear(&self, job_id: &str) {
        self.lock().listeners.remove(job_id);
    }

    /// Drop every registration. Called when the owning client session is
    /// torn down.
    pub fn dispose(&self) {
        self.lock().listeners.clear();
    }

    fn lock(&self) -> MutexGuard<'_, RouterInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panicking listener must not take the registry down.
                tracing::warn!("event router lock poisoned by a panicking listener");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerGuard {
    /// Remove the registration this guard refers to. Removes exactly one
    /// listener; other listeners on the same job id are untouched. Safe
    /// to call after the router is gone or the entry was already cleared.
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = match inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entries) = inner.listeners.get_mut(&self.job_id) {
            entries.retain(|r| r.token != self.token);
            if entries.is_empty() {
                // Last listener gone: release the bookkeeping for this id.
                inner.listeners.remove(&self.job_id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use darkroom_core::job_events::{EventKind, JobEvent};

    fn event(job_id: &str) -> JobEvent {
        JobEvent::new(job_id, EventKind::State).with_message("processing")
    }

    fn counting_listener(counter: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_e: &JobEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn every_listener_gets_the_event_exactly_once() {
        let router = EventRouter::new();
        let counts: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let mut guards: Vec<ListenerGuard> = counts
            .iter()
            .map(|c| router.on("j1", counting_listener(Arc::clone(c))))
            .collect();

        let delivered = router.emit(&event("j1"));
        assert_eq!(delivered, 3);
        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }

        // Removing one listener leaves the other two receiving.
        guards.remove(0).unsubscribe();
        let delivered = router.emit(&event("j1"));
        assert_eq!(delivered, 2);
        assert_eq!(counts[0].load(Ordering::SeqCst), 1);
        assert_eq!(counts[1].load(Ordering::SeqCst), 2);
        assert_eq!(counts[2].load(Ordering::SeqCst), 2);
    }

    #[test]
    fn events_route_by_job_id() {
        let router = EventRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _guard = router.on("j1", counting_listener(Arc::clone(&count)));

        router.emit(&event("j2"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        router.emit(&event("j1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_callback_is_not_double_registered() {
        let router = EventRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(Arc::clone(&count));

        let _g1 = router.on("j1", Arc::clone(&listener));
        let _g2 = router.on("j1", listener);
        assert_eq!(router.listener_count("j1"), 1);

        router.emit(&event("j1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_dispatch() {
        let router = Arc::new(EventRouter::new());
        let guard_slot: Arc<StdMutex<Option<ListenerGuard>>> = Arc::new(StdMutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let slot = Arc::clone(&guard_slot);
        let c = Arc::clone(&count);
        let listener: Listener = Arc::new(move |_e| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(guard) = slot.lock().unwrap().take() {
                guard.unsubscribe();
            }
        });
        *guard_slot.lock().unwrap() = Some(router.on("j1", listener));

        // First emit delivers and self-removes; second emit reaches nobody.
        assert_eq!(router.emit(&event("j1")), 1);
        assert_eq!(router.emit(&event("j1")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_unsubscribe_releases_the_entry() {
        let router = EventRouter::new();
        let guard = router.on("j1", Arc::new(|_e: &JobEvent| {}));
        assert_eq!(router.listener_count("j1"), 1);
        guard.unsubscribe();
        assert_eq!(router.listener_count("j1"), 0);
    }

    #[test]
    fn unsubscribe_after_dispose_is_harmless() {
        let router = EventRouter::new();
        let guard = router.on("j1", Arc::new(|_e: &JobEvent| {}));
        router.dispose();
        guard.unsubscribe();
        assert_eq!(router.listener_count("j1"), 0);
    }

    #[test]
    fn clear_drops_only_that_job() {
        let router = EventRouter::new();
        let _g1 = router.on("j1", Arc::new(|_e: &JobEvent| {}));
        let _g2 = router.on("j2", Arc::new(|_e: &JobEvent| {}));
        router.clear("j1");
        assert_eq!(router.listener_count("j1"), 0);
        assert_eq!(router.listener_count("j2"), 1);
    }
}
