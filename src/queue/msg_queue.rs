//! # Per-subscriber message queue with a dedicated delivery worker.
//!
//! ## Architecture
//! ```text
//! receive loop ── enqueue(msg) ──► [ Ring (fixed) ] ──► worker ──► listener
//!   (shared,        O(1), never      overflow → newest     (own pace,
//!    never blocks)  awaits           slot = loss marker)    may block)
//! ```
//!
//! ## Rules
//! - **Non-blocking producer**: `enqueue`/`dropped` take a short lock and return.
//! - **Per-subscriber FIFO**: the worker pops slots in push order, markers included.
//! - **Loss over history**: a full ring marks loss instead of growing.
//! - **Close**: the worker exits at its next wake without touching remaining slots.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::listeners::Handler;

use super::ring::{Ring, Slot};

struct State {
    ring: Ring,
    closed: bool,
}

/// State shared between producers and the worker.
struct Shared {
    state: Mutex<State>,
    wake: Notify,
}

/// Bounded queue feeding exactly one listener.
pub(crate) struct MsgQueue {
    shared: Arc<Shared>,
    ctx: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MsgQueue {
    /// Creates a queue of `capacity` slots and spawns its delivery worker.
    ///
    /// `ctx` is handed to the listener on every delivery and cancelled on [`close`](Self::close).
    pub(crate) fn spawn(handler: Handler, capacity: usize, ctx: CancellationToken) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ring: Ring::with_capacity(capacity),
                closed: false,
            }),
            wake: Notify::new(),
        });
        let worker = tokio::spawn(Self::run(Arc::clone(&shared), handler, ctx.clone()));

        Arc::new(Self {
            shared,
            ctx,
            worker: Mutex::new(Some(worker)),
        })
    }

    async fn run(shared: Arc<Shared>, handler: Handler, ctx: CancellationToken) {
        loop {
            let slot = loop {
                {
                    let mut st = shared.state.lock();
                    if st.closed {
                        return;
                    }
                    if let Some(slot) = st.ring.pop() {
                        break slot;
                    }
                }
                shared.wake.notified().await;
            };
            handler.deliver(ctx.clone(), slot).await;
        }
    }

    /// Queues a message. Returns `false` if the queue was full and loss was marked instead.
    pub(crate) fn enqueue(&self, msg: Bytes) -> bool {
        self.push(Slot::Message(msg))
    }

    /// Records that messages may have been missed.
    pub(crate) fn dropped(&self) {
        self.push(Slot::Dropped);
    }

    fn push(&self, slot: Slot) -> bool {
        let stored = {
            let mut st = self.shared.state.lock();
            if st.closed {
                return false;
            }
            st.ring.push(slot)
        };
        if stored {
            self.shared.wake.notify_one();
        }
        stored
    }

    /// Marks the queue closed and wakes the worker so it exits.
    ///
    /// Safe to call more than once.
    pub(crate) fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.wake.notify_one();
        self.ctx.cancel();
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.shared.state.lock().ring.len()
    }

    /// Waits for the worker to exit.
    #[cfg(test)]
    pub(crate) async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}

impl Drop for MsgQueue {
    fn drop(&mut self) {
        self.close();
        // detach; the worker sees `closed` and exits on its own
        drop(self.worker.get_mut().take());
    }
}
