//! Error types used by the pubsub layer and its transports.
//!
//! This module defines two enums:
//!
//! - [`TransportError`]: failures reported by the notification connection.
//! - [`PubsubError`]: errors surfaced to pubsub callers, including the
//!   [`PubsubError::DroppedMessages`] loss sentinel delivered to error-aware listeners.
//!
//! Both provide [`as_label`](PubsubError::as_label) for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a notification transport.
///
/// `AlreadyListening` is not a failure from the pubsub's point of view: a
/// subscribe that hits it proceeds as if `listen` had succeeded.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection already listens on this channel.
    #[error("channel {0:?} is already open")]
    AlreadyListening(String),

    /// The connection does not listen on this channel.
    #[error("channel {0:?} is not open")]
    NotListening(String),

    /// Payload exceeds what the notification primitive accepts.
    #[error("payload of {len} bytes exceeds the {max}-byte notify limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// Transport ceiling.
        max: usize,
    },

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use notifybus::TransportError;
    ///
    /// let err = TransportError::AlreadyListening("jobs".into());
    /// assert_eq!(err.as_label(), "transport_already_listening");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::AlreadyListening(_) => "transport_already_listening",
            TransportError::NotListening(_) => "transport_not_listening",
            TransportError::PayloadTooLarge { .. } => "transport_payload_too_large",
            TransportError::ConnectionClosed => "transport_connection_closed",
            TransportError::Other(_) => "transport_other",
        }
    }
}

/// # Errors produced by the pubsub layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PubsubError {
    /// Messages were dropped, or may have been (queue overflow, reconnect).
    ///
    /// Only error-aware listeners ever observe this value.
    #[error("dropped messages")]
    DroppedMessages,

    /// Issuing `listen` for the event failed.
    #[error("listen {event:?}: {source}")]
    Listen {
        /// Event (channel) name.
        event: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Issuing `notify` for the event failed.
    #[error("publish {event:?}: {source}")]
    Publish {
        /// Event (channel) name.
        event: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Closing the transport failed.
    #[error("close transport: {0}")]
    Close(#[source] TransportError),

    /// The pubsub has been closed.
    #[error("pubsub is closed")]
    Closed,

    /// The transport did not hand over its notification stream.
    #[error("transport notification stream is unavailable")]
    NotificationsUnavailable,

    /// The builder was finished without a transport.
    #[error("no transport configured")]
    MissingTransport,

    /// Creating the Prometheus collectors failed.
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A latency ping did not come back in time.
    #[error("latency measurement timed out after {timeout:?}")]
    LatencyTimeout {
        /// Measurement deadline.
        timeout: Duration,
    },
}

impl PubsubError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use notifybus::PubsubError;
    ///
    /// assert_eq!(PubsubError::DroppedMessages.as_label(), "pubsub_dropped_messages");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PubsubError::DroppedMessages => "pubsub_dropped_messages",
            PubsubError::Listen { .. } => "pubsub_listen_failed",
            PubsubError::Publish { .. } => "pubsub_publish_failed",
            PubsubError::Close(_) => "pubsub_close_failed",
            PubsubError::Closed => "pubsub_closed",
            PubsubError::NotificationsUnavailable => "pubsub_notifications_unavailable",
            PubsubError::MissingTransport => "pubsub_missing_transport",
            PubsubError::Metrics(_) => "pubsub_metrics_failed",
            PubsubError::LatencyTimeout { .. } => "pubsub_latency_timeout",
        }
    }

    /// True for the loss sentinel.
    pub fn is_dropped_messages(&self) -> bool {
        matches!(self, PubsubError::DroppedMessages)
    }
}
