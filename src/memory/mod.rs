//! # In-memory pubsub for single-process deployments and tests.
//!
//! [`MemoryPubsub`] implements [`Pubsub`] without a transport, queues or
//! reconnect handling.
//!
//! ## Rules
//! - `publish` snapshots the event's listeners, delivers to each on its own
//!   task, and returns once every delivery has finished.
//! - No ordering between listeners; nothing is silently dropped.
//! - Error-aware listeners never see a loss marker here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::core::{Pubsub, Subscription};
use crate::error::PubsubError;
use crate::listeners::{Handler, ListenerRef, ListenerWithErrRef};

type Listeners = Mutex<HashMap<String, HashMap<Uuid, Handler>>>;

/// Direct fan-out pubsub.
#[derive(Clone, Default)]
pub struct MemoryPubsub {
    listeners: Arc<Listeners>,
    ctx: CancellationToken,
}

impl MemoryPubsub {
    /// Creates an empty pubsub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions for `event`.
    pub fn subscribers(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, HashMap::len)
    }

    fn subscribe_handler(&self, event: &str, handler: Handler) -> Subscription {
        let id = Uuid::new_v4();
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .insert(id, handler);

        let listeners = Arc::clone(&self.listeners);
        let ev = event.to_string();
        Subscription::new(event, move || async move {
            let mut map = listeners.lock();
            if let Some(set) = map.get_mut(&ev) {
                set.remove(&id);
                if set.is_empty() {
                    map.remove(&ev);
                }
            }
        })
    }
}

#[async_trait]
impl Pubsub for MemoryPubsub {
    async fn subscribe(
        &self,
        event: &str,
        listener: ListenerRef,
    ) -> Result<Subscription, PubsubError> {
        Ok(self.subscribe_handler(event, Handler::Plain(listener)))
    }

    async fn subscribe_with_err(
        &self,
        event: &str,
        listener: ListenerWithErrRef,
    ) -> Result<Subscription, PubsubError> {
        Ok(self.subscribe_handler(event, Handler::WithErr(listener)))
    }

    async fn publish(&self, event: &str, message: &[u8]) -> Result<(), PubsubError> {
        let targets: Vec<Handler> = match self.listeners.lock().get(event) {
            Some(set) => set.values().cloned().collect(),
            None => return Ok(()),
        };

        let msg = Bytes::copy_from_slice(message);
        let mut set = JoinSet::new();
        for h in targets {
            let msg = msg.clone();
            let ctx = self.ctx.clone();
            set.spawn(async move { h.deliver_message(ctx, msg).await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                error!(event, error = %err, "memory pubsub delivery task failed");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PubsubError> {
        Ok(())
    }
}
