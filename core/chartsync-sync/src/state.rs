//! Observable sync state.
//!
//! [`SyncStatus`] owns the process-wide [`SyncState`] snapshot. Only the
//! scheduler, the orchestrator and the auditing repository mutate it; any
//! number of observers read it, either through callbacks
//! ([`SyncStatus::subscribe`]) or a `tokio::sync::watch` receiver.

use chartsync_types::Timestamp;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Snapshot of the engine's externally visible state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_online: bool,
    /// Mutual-exclusion flag: at most one pass is in flight.
    pub is_syncing: bool,
    pub last_sync_at: Option<Timestamp>,
    /// Local writes to synced tables not yet confirmed by a pass.
    pub pending_changes: u64,
    /// Most recent failure, for a non-blocking banner.
    pub error: Option<String>,
}

/// Coarse phase derived from a [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Error,
    /// No new pass will start until connectivity returns.
    Offline,
}

impl SyncState {
    /// Derives the phase. An in-flight pass reports `Syncing` even if the
    /// device went offline meanwhile, since passes are never cancelled.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        if self.is_syncing {
            SyncPhase::Syncing
        } else if !self.is_online {
            SyncPhase::Offline
        } else if self.error.is_some() {
            SyncPhase::Error
        } else {
            SyncPhase::Idle
        }
    }
}

type Callback = Arc<dyn Fn(&SyncState) + Send + Sync>;

/// The state plus a counter bumped on every change.
struct Versioned {
    version: u64,
    state: SyncState,
}

struct Subscriber {
    id: u64,
    callback: Callback,
    /// Version last delivered to this callback.
    seen: u64,
}

struct Observers {
    subscribers: Vec<Subscriber>,
    /// Version last sent on the watch channel.
    watch_seen: u64,
}

impl Observers {
    fn behind(&self, version: u64) -> bool {
        self.watch_seen < version || self.subscribers.iter().any(|s| s.seen < version)
    }
}

/// Holder and publisher of the [`SyncState`].
///
/// Mutations never wait for observers. Publication is done by one thread at
/// a time, which keeps delivering the latest state until every observer has
/// seen it, so each observer sees states in order and always ends on the
/// current one. Intermediate states may be coalesced. Callbacks may call
/// back into the status.
pub struct SyncStatus {
    state: Mutex<Versioned>,
    observers: Mutex<Observers>,
    publisher: Mutex<()>,
    next_subscriber: AtomicU64,
    watch_tx: watch::Sender<SyncState>,
}

impl SyncStatus {
    /// Creates the status with the runtime's initial connectivity.
    #[must_use]
    pub fn new(is_online: bool) -> Arc<Self> {
        let initial = SyncState {
            is_online,
            ..Default::default()
        };
        let (watch_tx, _) = watch::channel(initial.clone());
        Arc::new(Self {
            state: Mutex::new(Versioned {
                version: 1,
                state: initial,
            }),
            observers: Mutex::new(Observers {
                subscribers: Vec::new(),
                watch_seen: 1,
            }),
            publisher: Mutex::new(()),
            next_subscriber: AtomicU64::new(1),
            watch_tx,
        })
    }

    // Plain data behind every lock, so a poisoned lock is still usable.

    fn lock_state(&self) -> MutexGuard<'_, Versioned> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.lock_state().state.clone()
    }

    fn versioned_snapshot(&self) -> (u64, SyncState) {
        let current = self.lock_state();
        (current.version, current.state.clone())
    }

    /// Registers a callback. It is invoked once with the current state and
    /// then on every change. Dropping the returned [`Subscription`]
    /// unsubscribes.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.lock_observers().subscribers.push(Subscriber {
            id,
            callback: Arc::new(callback),
            seen: 0,
        });
        self.publish();

        Subscription {
            id,
            status: Arc::downgrade(self),
        }
    }

    /// Async observers can await changes on this receiver.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.watch_tx.subscribe()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_observers().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_observers().subscribers.retain(|s| s.id != id);
    }

    /// Applies a mutation and publishes the result if anything changed.
    fn update(&self, mutate: impl FnOnce(&mut SyncState)) {
        {
            let mut current = self.lock_state();
            let before = current.state.clone();
            mutate(&mut current.state);
            if current.state == before {
                return;
            }
            current.version += 1;
        }
        self.publish();
    }

    /// Delivers the latest state to every observer that has not seen it.
    ///
    /// If another thread (or a caller further up this thread's stack) holds
    /// the publisher role, it picks up the new version before releasing it.
    fn publish(&self) {
        loop {
            {
                let _publisher = match self.publisher.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(p)) => p.into_inner(),
                    Err(TryLockError::WouldBlock) => return,
                };
                loop {
                    let (version, snapshot) = self.versioned_snapshot();
                    let (send_watch, due) = {
                        let mut observers = self.lock_observers();
                        let send_watch = observers.watch_seen < version;
                        observers.watch_seen = version;
                        let due: Vec<(u64, Callback)> = observers
                            .subscribers
                            .iter_mut()
                            .filter(|s| s.seen < version)
                            .map(|s| {
                                s.seen = version;
                                (s.id, s.callback.clone())
                            })
                            .collect();
                        (send_watch, due)
                    };
                    if !send_watch && due.is_empty() {
                        break;
                    }
                    if send_watch {
                        self.watch_tx.send_replace(snapshot.clone());
                    }
                    // Observer locks are released, so callbacks may re-enter.
                    for (id, callback) in &due {
                        invoke_isolated(*id, callback, &snapshot);
                    }
                }
            }
            // A mutation that lost the race for the publisher role may have
            // landed after the last check above.
            let version = self.lock_state().version;
            if !self.lock_observers().behind(version) {
                return;
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Records a connectivity change. Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        let mut previous = online;
        self.update(|s| {
            previous = s.is_online;
            s.is_online = online;
        });
        previous
    }

    /// Whether the device is currently online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.lock_state().state.is_online
    }

    /// Whether a pass is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.lock_state().state.is_syncing
    }

    /// Claims the single pass slot. Returns `false` (and changes nothing) if
    /// a pass is already running.
    pub fn try_begin_sync(&self) -> bool {
        {
            let mut current = self.lock_state();
            if current.state.is_syncing {
                return false;
            }
            current.state.is_syncing = true;
            current.version += 1;
        }
        debug!("Sync pass slot acquired");
        self.publish();
        true
    }

    /// Releases the pass slot and records its outcome.
    ///
    /// `confirmed_changes` is subtracted from the pending count; writes made
    /// while the pass ran stay pending for the next one.
    pub fn finish_sync(&self, completed_at: Timestamp, error: Option<String>, confirmed_changes: u64) {
        self.update(|s| {
            s.is_syncing = false;
            s.last_sync_at = Some(completed_at);
            s.pending_changes = s.pending_changes.saturating_sub(confirmed_changes);
            s.error = error;
        });
    }

    /// Releases the pass slot without touching `last_sync_at`, for passes
    /// that ended before reaching the remote store.
    pub fn abort_sync(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|s| {
            s.is_syncing = false;
            s.error = Some(error);
        });
    }

    /// Counts one local write awaiting sync.
    pub fn record_local_change(&self) {
        self.update(|s| s.pending_changes = s.pending_changes.saturating_add(1));
    }

    /// Current pending count.
    #[must_use]
    pub fn pending_changes(&self) -> u64 {
        self.lock_state().state.pending_changes
    }

    /// Sets the error banner without changing anything else.
    pub fn set_error(&self, error: Option<String>) {
        self.update(|s| s.error = error);
    }
}

fn invoke_isolated(id: u64, callback: &Callback, state: &SyncState) {
    if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
        warn!("Sync state subscriber {} panicked; continuing", id);
    }
}

/// Handle returned by [`SyncStatus::subscribe`]. Unsubscribes when dropped.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    status: Weak<SyncStatus>,
}

impl Subscription {
    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(status) = self.status.upgrade() {
            status.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
