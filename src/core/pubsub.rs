//! # Pubsub contract.
//!
//! Implemented by [`NotifyPubsub`](crate::NotifyPubsub) (database notifications,
//! per-subscriber queues) and [`MemoryPubsub`](crate::MemoryPubsub) (direct
//! in-process fan-out). Collaborators depend on `Arc<dyn Pubsub>` only.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PubsubError;
use crate::listeners::{ListenerRef, ListenerWithErrRef};

use super::subscription::Subscription;

/// Fire-and-forget broadcast of byte messages on named events.
#[async_trait]
pub trait Pubsub: Send + Sync + 'static {
    /// Calls `listener` for every message published on `event`.
    async fn subscribe(&self, event: &str, listener: ListenerRef)
        -> Result<Subscription, PubsubError>;

    /// Like [`subscribe`](Self::subscribe), but the listener is also told when
    /// messages were (or may have been) dropped.
    async fn subscribe_with_err(
        &self,
        event: &str,
        listener: ListenerWithErrRef,
    ) -> Result<Subscription, PubsubError>;

    /// Publishes `message` on `event`. No buffering, no retry.
    async fn publish(&self, event: &str, message: &[u8]) -> Result<(), PubsubError>;

    /// Shuts the pubsub down. Later calls do not panic.
    async fn close(&self) -> Result<(), PubsubError>;
}

/// Shared handle to a pubsub.
pub type PubsubRef = Arc<dyn Pubsub>;
