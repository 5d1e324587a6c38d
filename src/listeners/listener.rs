//! # Listener traits
//!
//! Extension points invoked by a subscription's delivery worker.
//!
//! ## Contract
//! - Implementations may be slow; they only delay their own queue.
//! - `ctx` is cancelled when the subscription is cancelled or the pubsub closes.
//!   Long-running listeners should watch it and return early.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::PubsubError;

/// What an error-aware listener receives per slot.
///
/// `Err` is always [`PubsubError::DroppedMessages`].
pub type Delivery = Result<Bytes, PubsubError>;

/// Plain listener: sees messages, never loss markers.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Handle one message.
    async fn on_message(&self, ctx: CancellationToken, message: Bytes);

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Error-aware listener: sees messages and loss markers.
#[async_trait]
pub trait ListenerWithErr: Send + Sync + 'static {
    /// Handle one message or one loss marker.
    async fn on_delivery(&self, ctx: CancellationToken, delivery: Delivery);

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a plain listener.
pub type ListenerRef = Arc<dyn Listener>;

/// Shared handle to an error-aware listener.
pub type ListenerWithErrRef = Arc<dyn ListenerWithErr>;
