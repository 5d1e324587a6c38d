//! Tagged union over the two listener shapes.
//!
//! ## Panic handling
//! Deliveries run under `catch_unwind`: a panicking listener is logged and the
//! caller moves on to the next slot. `AssertUnwindSafe` is used, so a listener
//! that panics while holding its own lock may leave that state poisoned.

use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::PubsubError;
use crate::queue::Slot;

use super::listener::{ListenerRef, ListenerWithErrRef};

/// Exactly one listener per subscriber.
#[derive(Clone)]
pub(crate) enum Handler {
    Plain(ListenerRef),
    WithErr(ListenerWithErrRef),
}

impl Handler {
    pub(crate) fn name(&self) -> &str {
        match self {
            Handler::Plain(l) => l.name(),
            Handler::WithErr(l) => l.name(),
        }
    }

    /// Dispatches one slot. Loss markers are skipped for plain listeners.
    pub(crate) async fn deliver(&self, ctx: CancellationToken, slot: Slot) {
        let fut = match (self, slot) {
            (Handler::Plain(l), Slot::Message(msg)) => l.on_message(ctx, msg),
            (Handler::Plain(_), Slot::Dropped) => return,
            (Handler::WithErr(l), Slot::Message(msg)) => l.on_delivery(ctx, Ok(msg)),
            (Handler::WithErr(l), Slot::Dropped) => {
                l.on_delivery(ctx, Err(PubsubError::DroppedMessages))
            }
        };

        if let Err(panic_err) = AssertUnwindSafe(fut).catch_unwind().await {
            let info = {
                let any = &*panic_err;
                if let Some(msg) = any.downcast_ref::<&'static str>() {
                    (*msg).to_string()
                } else if let Some(msg) = any.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                }
            };
            error!(listener = self.name(), panic = %info, "pubsub listener panicked");
        }
    }

    /// Shorthand for delivering a real message.
    pub(crate) async fn deliver_message(&self, ctx: CancellationToken, msg: Bytes) {
        self.deliver(ctx, Slot::Message(msg)).await
    }
}
