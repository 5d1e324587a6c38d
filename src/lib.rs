//! # notifybus
//!
//! **notifybus** is a cluster-wide, fire-and-forget pub/sub layer over a
//! database-style notification channel (`LISTEN` / `UNLISTEN` / `NOTIFY`).
//!
//! Every replica shares one notification connection; each subscriber gets its
//! own bounded queue and delivery worker, so a slow listener never blocks the
//! connection or its siblings. Overflow and reconnects are signalled to
//! listeners that ask for it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   publish(event, msg)                       subscribe(event, listener)
//!          │                                            │
//!          ▼                                            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  NotifyPubsub (facade)                                            │
//! │  - Registry (event → subscriber queues, listen/unlisten refcount) │
//! │  - PubsubMetrics (prometheus counters, gauges, latency)           │
//! │  - receive loop (one task, reads the transport stream)            │
//! └──────┬─────────────────────────────────────────────────────┬──────┘
//!        │ notify / listen / unlisten                          │ route
//!        ▼                                                     ▼
//! ┌──────────────┐   Notification stream            ┌────────────────────┐
//! │  Transport   │ ───────────────────────────────► │ MsgQueue per sub   │
//! │ (connection) │   Message / Disconnected /       │ ring (2048 slots)  │
//! └──────────────┘   Reconnected                    └─────────┬──────────┘
//!                                              ┌──────────────┼──────────────┐
//!                                              ▼              ▼              ▼
//!                                           worker1        worker2        workerN
//!                                              ▼              ▼              ▼
//!                                         on_message    on_delivery     on_message
//! ```
//!
//! ### Delivery
//! ```text
//! receive loop:
//!   Message { channel, payload } ─► enqueue into every queue of `channel`
//!                                     └─ queue full ─► newest slot becomes a loss marker
//!   Reconnected                  ─► loss marker into every queue
//!
//! worker (per subscriber):
//!   Message(bytes) ─► Listener::on_message / ListenerWithErr::on_delivery(Ok)
//!   Dropped        ─► skipped              / ListenerWithErr::on_delivery(Err(DroppedMessages))
//! ```
//!
//! ## Features
//! | Area             | Description                                                     | Key types / traits                               |
//! |------------------|-----------------------------------------------------------------|--------------------------------------------------|
//! | **Pubsub API**   | Subscribe, publish and close over any implementation.           | [`Pubsub`], [`Subscription`]                     |
//! | **Listeners**    | Plain and loss-aware callbacks, or closures.                    | [`Listener`], [`ListenerWithErr`], [`ListenerFn`]|
//! | **Facade**       | Transport-backed pubsub with per-subscriber queues.             | [`NotifyPubsub`], [`PubsubBuilder`]              |
//! | **In-memory**    | Single-process pubsub without a transport.                      | [`MemoryPubsub`]                                 |
//! | **Transport**    | Connection contract and an in-process loopback implementation.  | [`Transport`], [`LoopbackHub`]                   |
//! | **Watchdog**     | Heartbeat liveness check of the notification path.              | [`Watchdog`]                                     |
//! | **Observability**| Prometheus collector, snapshot and round-trip latency.          | [`NotifyPubsub`], [`MetricsSnapshot`], [`LatencyMeasurer`] |
//! | **Errors**       | Typed errors with stable labels.                                | [`PubsubError`], [`TransportError`]              |
//! | **Configuration**| Queue size, size-class threshold, watchdog timings.             | [`PubsubConfig`], [`WatchdogConfig`]             |
//!
//! ## Example
//! ```rust
//! use bytes::Bytes;
//! use tokio_util::sync::CancellationToken;
//! use notifybus::{ListenerFn, LoopbackHub, Pubsub, PubsubBuilder, PubsubConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let pubsub = PubsubBuilder::new(PubsubConfig::default())
//!         .with_transport(hub.connect())
//!         .build()?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(1);
//!     let listener = ListenerFn::arc("printer", move |_ctx: CancellationToken, msg: Bytes| {
//!         let tx = tx.clone();
//!         async move {
//!             let _ = tx.send(msg).await;
//!         }
//!     });
//!
//!     let sub = pubsub.subscribe("test", listener).await?;
//!     pubsub.publish("test", b"testing").await?;
//!     assert_eq!(rx.recv().await.as_deref(), Some(&b"testing"[..]));
//!
//!     sub.cancel().await;
//!     pubsub.close().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod latency;
mod listeners;
mod memory;
mod metrics;
mod queue;
mod transport;
mod watchdog;

// ---- Public re-exports ----

pub use config::{PubsubConfig, WatchdogConfig, WATCHDOG_CHANNEL};
pub use core::{NotifyPubsub, Pubsub, PubsubBuilder, PubsubRef, Subscription};
pub use error::{PubsubError, TransportError};
pub use latency::{Latency, LatencyMeasurer};
pub use listeners::{
    Delivery, Listener, ListenerFn, ListenerRef, ListenerWithErr, ListenerWithErrFn,
    ListenerWithErrRef,
};
pub use memory::MemoryPubsub;
pub use metrics::{MetricsSnapshot, SizeClass};
pub use transport::{
    LoopbackHub, LoopbackStats, LoopbackTransport, Notification, NotificationStream, Transport,
    MAX_PAYLOAD_BYTES,
};
pub use watchdog::Watchdog;
