//! # Round-trip latency measurement.
//!
//! [`LatencyMeasurer::measure`] subscribes to a fresh channel
//! `latency-measure:<uuid>`, publishes the uuid on it and times both halves:
//!
//! ```text
//! start ── publish() ──► send ── ... ── listener sees uuid ──► recv
//! ```
//!
//! Pings from other measurements on the same channel are ignored by payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::Pubsub;
use crate::error::PubsubError;
use crate::listeners::ListenerFn;

const CHANNEL_PREFIX: &str = "latency-measure:";

/// Result of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    /// Time spent in `publish`.
    pub send: Duration,
    /// Time from the start of `publish` until the ping was received.
    pub recv: Duration,
}

/// Measures publish and delivery latency over any [`Pubsub`].
#[derive(Debug, Default)]
pub struct LatencyMeasurer {
    measured: AtomicU64,
    failed: AtomicU64,
}

impl LatencyMeasurer {
    /// Creates a measurer with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one round trip; fails with [`PubsubError::LatencyTimeout`] if the
    /// ping is not back within `timeout`.
    pub async fn measure(
        &self,
        pubsub: &dyn Pubsub,
        timeout: Duration,
    ) -> Result<Latency, PubsubError> {
        let res = self.round_trip(pubsub, timeout).await;
        match &res {
            Ok(lat) => {
                self.measured.fetch_add(1, Ordering::Relaxed);
                debug!(send = ?lat.send, recv = ?lat.recv, "latency measured");
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, label = err.as_label(), "latency measurement failed");
            }
        }
        res
    }

    /// Successful measurements so far.
    pub fn measured(&self) -> u64 {
        self.measured.load(Ordering::Relaxed)
    }

    /// Failed measurements so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    async fn round_trip(&self, pubsub: &dyn Pubsub, timeout: Duration) -> Result<Latency, PubsubError> {
        let id = Uuid::new_v4().to_string();
        let channel = format!("{CHANNEL_PREFIX}{id}");
        let ping = Bytes::from(id.into_bytes());

        let (tx, mut rx) = mpsc::channel::<Instant>(1);
        let expected = ping.clone();
        let listener = ListenerFn::arc("latency", move |_ctx: CancellationToken, msg: Bytes| {
            if msg == expected {
                let _ = tx.try_send(Instant::now());
            }
            async {}
        });
        let sub = pubsub.subscribe(&channel, listener).await?;

        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, async {
            pubsub.publish(&channel, &ping).await?;
            let send = start.elapsed();
            match rx.recv().await {
                Some(at) => Ok(Latency {
                    send,
                    recv: at.duration_since(start),
                }),
                None => Err(PubsubError::Closed),
            }
        })
        .await;
        sub.cancel().await;

        match outcome {
            Ok(res) => res,
            Err(_) => Err(PubsubError::LatencyTimeout { timeout }),
        }
    }
}
