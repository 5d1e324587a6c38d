//! In-process notification server.
//!
//! [`LoopbackHub`] plays the database: it holds every open connection and
//! routes `notify(channel, payload)` to each connection listening on that
//! channel. [`LoopbackTransport`] is one such connection.
//!
//! Fault hooks (`fail_next_*`, `inject_*`) let tests drive the error paths
//! a real driver would hit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;

use super::{Notification, NotificationStream, Transport, MAX_PAYLOAD_BYTES};

/// Inbound buffer per connection.
const STREAM_CAPACITY: usize = 32;

/// Server side of one connection.
struct Conn {
    listening: Mutex<HashSet<String>>,
    tx: Mutex<Option<mpsc::Sender<Notification>>>,
}

impl Conn {
    fn sender(&self) -> Option<mpsc::Sender<Notification>> {
        self.tx.lock().clone()
    }
}

/// Shared routing table for loopback connections.
#[derive(Default)]
pub struct LoopbackHub {
    next_id: AtomicU64,
    conns: Mutex<HashMap<u64, Arc<Conn>>>,
}

impl LoopbackHub {
    /// Creates an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a new connection.
    pub fn connect(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let conn = Arc::new(Conn {
            listening: Mutex::new(HashSet::new()),
            tx: Mutex::new(Some(tx)),
        });
        self.conns.lock().insert(id, Arc::clone(&conn));

        Arc::new(LoopbackTransport {
            hub: Arc::clone(self),
            id,
            conn,
            rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            faults: Mutex::new(Faults::default()),
            listens: AtomicU64::new(0),
            unlistens: AtomicU64::new(0),
            notifies: AtomicU64::new(0),
        })
    }

    /// Number of open connections.
    pub fn connections(&self) -> usize {
        self.conns.lock().len()
    }

    async fn route(&self, channel: &str, payload: Bytes) {
        let targets: Vec<mpsc::Sender<Notification>> = {
            let conns = self.conns.lock();
            conns
                .values()
                .filter(|c| c.listening.lock().contains(channel))
                .filter_map(|c| c.sender())
                .collect()
        };

        for tx in targets {
            let _ = tx
                .send(Notification::Message {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                })
                .await;
        }
    }

    fn disconnect(&self, id: u64) {
        self.conns.lock().remove(&id);
    }
}

#[derive(Default)]
struct Faults {
    listen: Option<TransportError>,
    unlisten: Option<TransportError>,
    notify: Option<TransportError>,
}

/// Successful operation counts of one loopback connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopbackStats {
    /// `listen` calls that opened a channel.
    pub listens: u64,
    /// `unlisten` calls that closed a channel.
    pub unlistens: u64,
    /// `notify` calls that were routed.
    pub notifies: u64,
}

/// One connection to a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    id: u64,
    conn: Arc<Conn>,
    rx: Mutex<Option<NotificationStream>>,
    closed: AtomicBool,
    faults: Mutex<Faults>,
    listens: AtomicU64,
    unlistens: AtomicU64,
    notifies: AtomicU64,
}

impl LoopbackTransport {
    /// Makes the next `listen` fail with `err`.
    pub fn fail_next_listen(&self, err: TransportError) {
        self.faults.lock().listen = Some(err);
    }

    /// Makes the next `unlisten` fail with `err`.
    pub fn fail_next_unlisten(&self, err: TransportError) {
        self.faults.lock().unlisten = Some(err);
    }

    /// Makes the next `notify` fail with `err`.
    pub fn fail_next_notify(&self, err: TransportError) {
        self.faults.lock().notify = Some(err);
    }

    /// Emits a disconnect event on this connection's inbound stream.
    pub async fn inject_disconnect(&self, reason: impl Into<String>) {
        self.emit(Notification::Disconnected {
            reason: reason.into(),
        })
        .await;
    }

    /// Emits a reconnect event on this connection's inbound stream.
    ///
    /// Listened channels are kept, as a driver re-issues them after reconnecting.
    pub async fn inject_reconnect(&self) {
        self.emit(Notification::Reconnected).await;
    }

    /// True if this connection listens on `channel`.
    pub fn is_listening(&self, channel: &str) -> bool {
        self.conn.listening.lock().contains(channel)
    }

    /// Successful operation counts.
    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            listens: self.listens.load(Ordering::Relaxed),
            unlistens: self.unlistens.load(Ordering::Relaxed),
            notifies: self.notifies.load(Ordering::Relaxed),
        }
    }

    async fn emit(&self, n: Notification) {
        if let Some(tx) = self.conn.sender() {
            let _ = tx.send(n).await;
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn listen(&self, channel: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(err) = self.faults.lock().listen.take() {
            return Err(err);
        }
        if !self.conn.listening.lock().insert(channel.to_string()) {
            return Err(TransportError::AlreadyListening(channel.to_string()));
        }
        self.listens.fetch_add(1, Ordering::Relaxed);
        debug!(conn = self.id, channel, "loopback listen");
        Ok(())
    }

    async fn unlisten(&self, channel: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(err) = self.faults.lock().unlisten.take() {
            return Err(err);
        }
        if !self.conn.listening.lock().remove(channel) {
            return Err(TransportError::NotListening(channel.to_string()));
        }
        self.unlistens.fetch_add(1, Ordering::Relaxed);
        debug!(conn = self.id, channel, "loopback unlisten");
        Ok(())
    }

    async fn notify(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(err) = self.faults.lock().notify.take() {
            return Err(err);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        self.hub
            .route(channel, Bytes::copy_from_slice(payload))
            .await;
        self.notifies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn take_notifications(&self) -> Option<NotificationStream> {
        self.rx.lock().take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::ConnectionClosed);
        }
        self.hub.disconnect(self.id);
        self.conn.listening.lock().clear();
        self.conn.tx.lock().take();
        debug!(conn = self.id, "loopback connection closed");
        Ok(())
    }
}
