//! # Sync State
//!
//! The single owner of everything a session publishes: the [`Snapshot`], the
//! `connected` flag and the latest [`DiscoveryEvent`]. Exactly one transport
//! holds the write side for the lifetime of a session; consumers only read.
//!
//! ## Liveness gate
//! Every mutation runs under one `gate` mutex and is skipped once the state
//! has been closed. Discovery observers are invoked while that gate is held.
//! [`SyncState::close`] raises the `closed` flag and then takes the same
//! mutex, so once `close` returns no mutation is in flight and none can
//! start. That is what makes teardown deterministic even though the
//! transport loop runs on its own task.
//!
//! An observer may close the state (e.g. tear the session down) from inside
//! its callback. The dispatching thread is remembered, and calls made from it
//! while the gate is held skip the mutex instead of waiting on themselves.
//! Observers after the one that closed the state are not invoked.
//!
//! ## Reading
//! Values are published through `tokio::sync::watch` senders, so readers can
//! either take a clone of the current value or `subscribe()` and await changes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::watch;

use crate::protocol::DiscoveryEvent;
use crate::snapshot::{Snapshot, SnapshotUpdate};

type Observer = Arc<dyn Fn(&DiscoveryEvent) + Send + Sync>;

/// Handle returned by [`SyncState::add_observer`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that a mutation may proceed.
enum Gate<'a> {
    Held(#[allow(dead_code)] MutexGuard<'a, ()>),
    /// Already held further up this thread's stack by a dispatching observer.
    Reentrant,
}

/// Marks the current thread as dispatching observers until dropped.
struct Dispatch<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
    previous: Option<ThreadId>,
}

impl<'a> Dispatch<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        let previous = lock(slot).replace(thread::current().id());
        Self { slot, previous }
    }
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = self.previous;
    }
}

/// Shared, gated owner of snapshot, connection and discovery state.
pub struct SyncState {
    gate: Mutex<()>,
    closed: AtomicBool,
    dispatcher: Mutex<Option<ThreadId>>,
    snapshot: watch::Sender<Snapshot>,
    connected: watch::Sender<bool>,
    discovery: watch::Sender<Option<DiscoveryEvent>>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// Empty snapshot, disconnected, no discovery yet.
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        let (connected, _) = watch::channel(false);
        let (discovery, _) = watch::channel(None);
        Self {
            gate: Mutex::new(()),
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
            snapshot,
            connected,
            discovery,
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    fn dispatching_here(&self) -> bool {
        *lock(&self.dispatcher) == Some(thread::current().id())
    }

    /// Enters the liveness gate, or `None` once closed.
    fn enter(&self) -> Option<Gate<'_>> {
        let gate = if self.dispatching_here() {
            Gate::Reentrant
        } else {
            Gate::Held(lock(&self.gate))
        };
        if self.closed.load(Ordering::SeqCst) {
            None
        } else {
            Some(gate)
        }
    }

    // --- Write side (active transport only) ---

    /// Applies an update with field-level replace semantics.
    ///
    /// Returns `false` if the state is closed or the update carried no slice.
    pub fn apply_update(&self, update: SnapshotUpdate) -> bool {
        let Some(_gate) = self.enter() else {
            return false;
        };
        self.snapshot.send_if_modified(|snap| update.apply_to(snap))
    }

    /// Sets the connection flag. Returns `true` if the value changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        let Some(_gate) = self.enter() else {
            return false;
        };
        self.connected.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        })
    }

    /// Overwrites the discovery holder and runs every observer synchronously.
    ///
    /// Returns `false` if the state is closed; nothing is stored or notified.
    pub fn record_discovery(&self, event: DiscoveryEvent) -> bool {
        let Some(_gate) = self.enter() else {
            return false;
        };
        self.discovery.send_replace(Some(event.clone()));

        // Clone the list so observers may add or remove observers.
        let observers: Vec<Observer> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        let _dispatch = Dispatch::enter(&self.dispatcher);
        for observer in observers {
            if self.is_closed() {
                break;
            }
            observer(&event);
        }
        true
    }

    /// Closes the state. Returns `true` on the first call only.
    ///
    /// Blocks until any in-flight mutation (including observer callbacks) has
    /// finished, unless called from one of those callbacks. Nothing is
    /// mutated or notified afterwards.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if !self.dispatching_here() {
            drop(lock(&self.gate));
        }
        first
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- Observers ---

    /// Registers a discovery observer. It runs on the transport's task,
    /// inside the same turn that decoded the event.
    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&DiscoveryEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push((id, Arc::new(observer)));
        id
    }

    /// Removes an observer. Unknown ids are ignored.
    pub fn remove_observer(&self, id: ObserverId) {
        lock(&self.observers).retain(|(existing, _)| *existing != id);
    }

    // --- Read side ---

    /// A clone of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Runs `f` against the current snapshot without cloning it.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.snapshot.borrow())
    }

    /// Current connection flag.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// The latest discovery, if any has been seen.
    pub fn latest_discovery(&self) -> Option<DiscoveryEvent> {
        self.discovery.borrow().clone()
    }

    /// Receiver that wakes on every snapshot change.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Receiver that wakes on every connection flag flip.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Receiver that wakes on every new discovery.
    pub fn subscribe_discovery(&self) -> watch::Receiver<Option<DiscoveryEvent>> {
        self.discovery.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Fleet, StatusSummary};
    use std::sync::atomic::AtomicUsize;

    fn event(expression: &str) -> DiscoveryEvent {
        DiscoveryEvent {
            form: "kbn".into(),
            expression: expression.into(),
            digits: 12,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    fn status_update(total: u64) -> SnapshotUpdate {
        SnapshotUpdate {
            status: Some(StatusSummary {
                total,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn starts_disconnected_and_empty() {
        let state = SyncState::new();
        assert!(!state.is_connected());
        assert_eq!(state.snapshot(), Snapshot::default());
        assert!(state.latest_discovery().is_none());
    }

    #[test]
    fn discovery_does_not_touch_snapshot() {
        let state = SyncState::new();
        state.apply_update(status_update(3));
        let before = state.snapshot();
        assert!(state.record_discovery(event("3*2^5+1")));
        assert_eq!(state.snapshot(), before);
        assert_eq!(state.latest_discovery(), Some(event("3*2^5+1")));
    }

    #[test]
    fn update_does_not_touch_discovery() {
        let state = SyncState::new();
        state.record_discovery(event("first"));
        state.apply_update(SnapshotUpdate {
            fleet: Some(Fleet::default()),
            ..Default::default()
        });
        assert_eq!(state.latest_discovery(), Some(event("first")));
    }

    #[test]
    fn discovery_holder_keeps_only_latest() {
        let state = SyncState::new();
        state.record_discovery(event("a"));
        state.record_discovery(event("b"));
        assert_eq!(state.latest_discovery().unwrap().expression, "b");
    }

    #[test]
    fn observers_run_synchronously_and_can_be_removed() {
        let state = SyncState::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = state.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        state.record_discovery(event("a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        state.remove_observer(id);
        state.record_discovery(event("b"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connected_reports_only_real_flips() {
        let state = SyncState::new();
        assert!(!state.set_connected(false));
        assert!(state.set_connected(true));
        assert!(!state.set_connected(true));
        assert!(state.set_connected(false));
    }

    #[test]
    fn close_is_idempotent_and_freezes_everything() {
        let state = SyncState::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        state.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        state.apply_update(status_update(1));
        state.set_connected(true);

        assert!(state.close());
        assert!(!state.close());
        assert!(state.is_closed());

        assert!(!state.apply_update(status_update(2)));
        assert!(!state.set_connected(false));
        assert!(!state.record_discovery(event("late")));

        assert_eq!(state.snapshot().status.unwrap().total, 1);
        assert!(state.is_connected());
        assert!(state.latest_discovery().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn observer_may_close_the_state_it_is_notified_by() {
        let state = Arc::new(SyncState::new());
        let weak = Arc::downgrade(&state);
        state.add_observer(move |_| {
            if let Some(state) = weak.upgrade() {
                assert!(state.close());
                assert!(!state.set_connected(true));
            }
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        state.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&state);
        std::thread::spawn(move || {
            let _ = tx.send(worker.record_discovery(event("3*2^9+1")));
        });
        let delivered = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("closing from an observer deadlocked");

        assert!(delivered);
        assert!(state.is_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!state.record_discovery(event("late")));
        assert_eq!(state.latest_discovery(), Some(event("3*2^9+1")));

        // The gate is free again for callers on other threads.
        assert!(!state.close());
        assert!(!state.apply_update(status_update(1)));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let state = SyncState::new();
        let mut rx = state.subscribe_snapshot();
        state.apply_update(status_update(9));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status.as_ref().unwrap().total, 9);

        // An empty update is not a change.
        assert!(!state.apply_update(SnapshotUpdate::default()));
        assert!(!rx.has_changed().unwrap());
    }
}
