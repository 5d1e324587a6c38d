//! # Subscription registry - event name → subscriber queues.
//!
//! ## Architecture
//! ```text
//! Registry (one mutex)
//!   └─ HashMap<event, QueueSet>
//!        ├─ queues: HashMap<Uuid, Arc<MsgQueue>>
//!        └─ unlisten_in_progress: Option<CancellationToken>
//! ```
//!
//! ## Rules
//! - The lock is **never** held across a transport call.
//! - Routing only performs non-blocking enqueues under the lock.
//! - An entry exists while it has subscribers, or while its last cancel is
//!   still unlistening (empty, with `unlisten_in_progress` set).
//! - A subscriber attaching to an entry with an unlisten in progress must wait
//!   for it before issuing `listen`, otherwise the stale unlisten would win.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::queue::MsgQueue;

#[derive(Default)]
struct QueueSet {
    queues: HashMap<Uuid, Arc<MsgQueue>>,
    /// Cancelled by the unlistening task once `unlisten` has returned.
    unlisten_in_progress: Option<CancellationToken>,
}

/// Outcome of removing a subscriber.
pub(crate) enum Detach {
    /// No entry for the event.
    Missing,
    /// Other subscribers remain; nothing to unlisten.
    Remaining,
    /// The set is now empty: the caller must unlisten, then call
    /// [`Registry::finish_unlisten`] with this token.
    Last(CancellationToken),
}

/// Event name → subscriber queues.
#[derive(Default)]
pub(crate) struct Registry {
    sets: Mutex<HashMap<String, QueueSet>>,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `queue` under `event`.
    ///
    /// Returns the signal of an unlisten still running for `event`; the
    /// caller must wait for it before calling `listen`.
    pub(crate) fn attach(
        &self,
        event: &str,
        id: Uuid,
        queue: Arc<MsgQueue>,
    ) -> Option<CancellationToken> {
        let mut sets = self.sets.lock();
        let set = sets.entry(event.to_string()).or_default();
        set.queues.insert(id, queue);
        set.unlisten_in_progress.clone()
    }

    /// Undoes [`attach`](Self::attach) for a subscribe that never listened.
    ///
    /// An emptied entry is kept while an unlisten is still running, so that
    /// [`finish_unlisten`](Self::finish_unlisten) removes it and releases waiters.
    pub(crate) fn abort(&self, event: &str, id: Uuid) {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get_mut(event) {
            if let Some(q) = set.queues.remove(&id) {
                q.close();
            }
            if set.queues.is_empty() && set.unlisten_in_progress.is_none() {
                sets.remove(event);
            }
        }
    }

    /// Removes and closes a subscriber's queue.
    pub(crate) fn detach(&self, event: &str, id: Uuid) -> Detach {
        let mut sets = self.sets.lock();
        let Some(set) = sets.get_mut(event) else {
            return Detach::Missing;
        };
        if let Some(q) = set.queues.remove(&id) {
            q.close();
        }
        if !set.queues.is_empty() {
            return Detach::Remaining;
        }
        let done = CancellationToken::new();
        set.unlisten_in_progress = Some(done.clone());
        Detach::Last(done)
    }

    /// Completes an unlisten started by [`Detach::Last`].
    ///
    /// Drops the entry if nobody attached meanwhile, then releases waiters.
    /// Both happen under the lock so a woken subscriber never sees the stale entry.
    pub(crate) fn finish_unlisten(&self, event: &str, done: &CancellationToken) {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get_mut(event) {
            if set.queues.is_empty() {
                sets.remove(event);
            } else {
                set.unlisten_in_progress = None;
            }
        }
        done.cancel();
    }

    /// Enqueues `payload` for every subscriber of `event`. Returns the fan-out width.
    pub(crate) fn route(&self, event: &str, payload: &Bytes) -> usize {
        let sets = self.sets.lock();
        let Some(set) = sets.get(event) else {
            return 0;
        };
        for q in set.queues.values() {
            q.enqueue(payload.clone());
        }
        set.queues.len()
    }

    /// Inserts a loss marker into every queue.
    pub(crate) fn mark_dropped(&self) {
        let sets = self.sets.lock();
        for q in sets.values().flat_map(|s| s.queues.values()) {
            q.dropped();
        }
    }

    /// Closes every queue; entries stay so later cancels find them.
    pub(crate) fn close_all(&self) {
        let sets = self.sets.lock();
        for q in sets.values().flat_map(|s| s.queues.values()) {
            q.close();
        }
    }

    /// Returns `(subscribers, events)`.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let sets = self.sets.lock();
        let subs = sets.values().map(|s| s.queues.len()).sum();
        (subs, sets.len())
    }

    /// Whether an entry exists for `event`.
    #[cfg(test)]
    pub(crate) fn contains(&self, event: &str) -> bool {
        self.sets.lock().contains_key(event)
    }
}
