use std::sync::Arc;

use crate::{config::PubsubConfig, error::PubsubError, transport::Transport};

use super::notify::NotifyPubsub;

/// Builder for constructing a [`NotifyPubsub`].
pub struct PubsubBuilder {
    cfg: PubsubConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl PubsubBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: PubsubConfig) -> Self {
        Self {
            cfg,
            transport: None,
        }
    }

    /// Sets the notification connection the pubsub will own.
    ///
    /// Its inbound stream is taken over by the pubsub's receive loop.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the pubsub and starts its receive loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<NotifyPubsub, PubsubError> {
        let transport = self.transport.ok_or(PubsubError::MissingTransport)?;
        NotifyPubsub::start(self.cfg, transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackHub, Transport};

    #[tokio::test]
    async fn test_build_requires_transport() {
        let err = PubsubBuilder::new(PubsubConfig::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PubsubError::MissingTransport));
    }

    #[tokio::test]
    async fn test_build_requires_notification_stream() {
        let conn = LoopbackHub::new().connect();
        let _stolen = conn.take_notifications();
        let err = PubsubBuilder::new(PubsubConfig::default())
            .with_transport(conn)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PubsubError::NotificationsUnavailable));
    }
}
