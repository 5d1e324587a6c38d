//! # Notification transport.
//!
//! The pubsub sits on a connection-oriented notification primitive
//! (database `LISTEN`/`UNLISTEN`/`NOTIFY`). [`Transport`] is the seam: the
//! real driver lives outside this crate; [`LoopbackTransport`] is an
//! in-process implementation for single-process use and tests.
//!
//! ## Inbound stream
//! ```text
//! Transport ── take_notifications() ──► mpsc::Receiver<Notification>
//!                                          │
//!                                          ├─ Message { channel, payload }
//!                                          ├─ Disconnected { reason }
//!                                          └─ Reconnected   (anything may have been missed)
//! ```
//! The stream ends when the transport is closed.

mod loopback;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use loopback::{LoopbackHub, LoopbackStats, LoopbackTransport};

/// Hard ceiling of the notification payload (the protocol limit is 8KB).
pub const MAX_PAYLOAD_BYTES: usize = 8000;

/// Inbound event from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A payload published on a channel this connection listens on.
    Message {
        /// Channel name.
        channel: String,
        /// Raw payload.
        payload: Bytes,
    },
    /// The connection was lost.
    Disconnected {
        /// Driver-provided reason.
        reason: String,
    },
    /// The connection was re-established; notifications may have been missed.
    Reconnected,
}

/// Receiving half of a transport's inbound stream.
pub type NotificationStream = mpsc::Receiver<Notification>;

/// Contract for the notification connection owned by the pubsub.
///
/// `listen` on an already-open channel must report
/// [`TransportError::AlreadyListening`] (the pubsub treats it as success).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts forwarding notifications for `channel`.
    async fn listen(&self, channel: &str) -> Result<(), TransportError>;

    /// Stops forwarding notifications for `channel`.
    async fn unlisten(&self, channel: &str) -> Result<(), TransportError>;

    /// Publishes `payload` on `channel`. Completes once the notify was issued.
    async fn notify(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Hands over the inbound stream. Returns `None` after the first call.
    fn take_notifications(&self) -> Option<NotificationStream>;

    /// Closes the connection; the inbound stream ends afterwards.
    async fn close(&self) -> Result<(), TransportError>;
}
