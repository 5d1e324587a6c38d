//! # NotifyPubsub: pubsub over a notification transport.
//!
//! ## Architecture
//! ```text
//! subscribe(event, listener)
//!   ├─► MsgQueue::spawn(handler)                       (worker per subscriber)
//!   ├─► Registry::attach(event, id, queue)             (wait if unlisten in progress)
//!   ├─► Transport::listen(event)                       (AlreadyListening = ok)
//!   └─► Subscription { cancel }
//!
//! receive loop (one task):
//!   Transport stream ──► Message { channel, payload } ──► Registry::route ──► queue.enqueue
//!                    ├─► Reconnected                  ──► Registry::mark_dropped
//!                    └─► Disconnected                 ──► metrics only
//!
//! publish(event, msg) ──► Transport::notify            (synchronous, unbuffered)
//!
//! cancel ──► Registry::detach ──► last? ──► Transport::unlisten ──► finish_unlisten
//! ```
//!
//! ## Rules
//! - The receive loop never awaits a listener; it only enqueues under the registry lock.
//! - A `subscribe` future dropped before it returns leaves nothing behind: its
//!   queue is detached, and unlistened if it was the last one.
//! - `close()` closes every queue, closes the transport once (result cached) and
//!   returns only after the receive loop has exited.
//! - Unlisten failures are logged, never returned: the subscriber is already gone.
//! - Collecting metrics reports the last latency measurement and starts a new
//!   one in the background.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PubsubConfig;
use crate::error::{PubsubError, TransportError};
use crate::latency::{Latency, LatencyMeasurer};
use crate::listeners::{Handler, ListenerRef, ListenerWithErrRef};
use crate::metrics::{MetricsSnapshot, PubsubMetrics};
use crate::queue::MsgQueue;
use crate::transport::{Notification, NotificationStream, Transport};

use super::pubsub::Pubsub;
use super::registry::{Detach, Registry};
use super::subscription::Subscription;

struct Inner {
    cfg: PubsubConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    metrics: Arc<PubsubMetrics>,
    latency: LatencyMeasurer,
    /// Set while a collect-triggered latency measurement runs.
    measuring: AtomicBool,
    /// Parent of every listener context; cancelled on close.
    root: CancellationToken,
    close_result: OnceCell<Result<(), TransportError>>,
    listen_done: Mutex<Option<JoinHandle<()>>>,
}

/// Pubsub backed by a [`Transport`], with a bounded queue per subscriber.
///
/// Cheap to clone; clones share the same connection and registry.
/// Register it with a [`prometheus::Registry`] to export its metrics.
#[derive(Clone)]
pub struct NotifyPubsub {
    inner: Arc<Inner>,
}

impl NotifyPubsub {
    /// Takes over `transport` and starts the receive loop.
    ///
    /// Must be called inside a tokio runtime.
    pub(crate) fn start(
        cfg: PubsubConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PubsubError> {
        let metrics = Arc::new(PubsubMetrics::new()?);
        let stream = transport
            .take_notifications()
            .ok_or(PubsubError::NotificationsUnavailable)?;

        let registry = Registry::new();
        let root = CancellationToken::new();
        metrics.set_connected(true);

        let handle = tokio::spawn(receive_loop(
            stream,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            cfg.colossal_threshold,
            root.clone(),
        ));

        debug!("pubsub has started");
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                transport,
                registry,
                metrics,
                latency: LatencyMeasurer::new(),
                measuring: AtomicBool::new(false),
                root,
                close_result: OnceCell::new(),
                listen_done: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Point-in-time metrics, including live subscriber and channel counts.
    pub fn metrics(&self) -> MetricsSnapshot {
        let (subs, events) = self.inner.registry.counts();
        self.inner.metrics.snapshot(subs, events)
    }

    /// True once [`close`](Pubsub::close) has started.
    pub fn is_closed(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Runs one latency measurement over this pubsub and records it in the
    /// latency metrics.
    pub async fn measure_latency(&self) -> Result<Latency, PubsubError> {
        let res = self
            .inner
            .latency
            .measure(self, self.inner.cfg.latency_timeout)
            .await;
        self.inner.metrics.record_latency(&res);
        res
    }

    fn spawn_latency_measure(&self) {
        if self.is_closed() || self.inner.measuring.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime to measure latency on");
            self.inner.measuring.store(false, Ordering::Release);
            return;
        };
        let ps = self.clone();
        rt.spawn(async move {
            let _ = ps.measure_latency().await;
            ps.inner.measuring.store(false, Ordering::Release);
        });
    }

    async fn subscribe_handler(
        &self,
        event: &str,
        handler: Handler,
    ) -> Result<Subscription, PubsubError> {
        let inner = &self.inner;
        if inner.root.is_cancelled() {
            inner.metrics.record_subscribe(false);
            return Err(PubsubError::Closed);
        }

        let queue = MsgQueue::spawn(
            handler,
            inner.cfg.buffer_size_clamped(),
            inner.root.child_token(),
        );
        let id = Uuid::new_v4();

        let wait = inner.registry.attach(event, id, queue);
        let mut pending = PendingSubscribe {
            inner: Arc::clone(inner),
            event: event.to_string(),
            id,
            stage: Some(Stage::Attached),
        };

        if let Some(wait) = wait {
            debug!(event, "waiting for unlisten in progress");
            wait.cancelled().await;
            debug!(event, "unlistening complete");
        }

        pending.stage = Some(Stage::Listening);
        // never under the registry lock: the driver's reply shares a loop with notifications
        match inner.transport.listen(event).await {
            Ok(()) => debug!(event, "started listening to event channel"),
            Err(TransportError::AlreadyListening(_)) => {}
            Err(source) => {
                pending.stage = None;
                inner.registry.abort(event, id);
                inner.metrics.record_subscribe(false);
                return Err(PubsubError::Listen {
                    event: event.to_string(),
                    source,
                });
            }
        }
        pending.stage = None;
        inner.metrics.record_subscribe(true);

        let me = Arc::clone(inner);
        let ev = event.to_string();
        Ok(Subscription::new(event, move || async move {
            me.cancel(&ev, id).await
        }))
    }
}

/// How far a `subscribe` got before its future was dropped.
enum Stage {
    /// Queue attached, possibly waiting for an unlisten in progress.
    Attached,
    /// `listen` issued; it may already have reached the transport.
    Listening,
}

/// Undoes a `subscribe` whose future is dropped before returning.
struct PendingSubscribe {
    inner: Arc<Inner>,
    event: String,
    id: Uuid,
    stage: Option<Stage>,
}

impl Drop for PendingSubscribe {
    fn drop(&mut self) {
        let Some(stage) = self.stage.take() else {
            return;
        };
        debug!(event = %self.event, "subscribe abandoned");
        match stage {
            Stage::Attached => self.inner.registry.abort(&self.event, self.id),
            Stage::Listening => {
                let Some(done) = self.inner.detach(&self.event, self.id) else {
                    return;
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        let inner = Arc::clone(&self.inner);
                        let event = std::mem::take(&mut self.event);
                        rt.spawn(async move { inner.unlisten(&event, done).await });
                    }
                    Err(_) => self.inner.registry.finish_unlisten(&self.event, &done),
                }
            }
        }
    }
}

impl Inner {
    async fn cancel(&self, event: &str, id: Uuid) {
        if let Some(done) = self.detach(event, id) {
            self.unlisten(event, done).await;
        }
    }

    /// Removes a subscriber; returns the unlisten signal if it was the last one.
    fn detach(&self, event: &str, id: Uuid) -> Option<CancellationToken> {
        match self.registry.detach(event, id) {
            Detach::Missing => {
                error!(event, "event was removed before cancel");
                None
            }
            Detach::Remaining => None,
            Detach::Last(done) => Some(done),
        }
    }

    async fn unlisten(&self, event: &str, done: CancellationToken) {
        let res = self.transport.unlisten(event).await;
        self.registry.finish_unlisten(event, &done);

        match res {
            Err(err) if !self.root.is_cancelled() => {
                warn!(event, error = %err, "failed to unlisten");
            }
            _ => debug!(event, "stopped listening to event channel"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[async_trait]
impl Pubsub for NotifyPubsub {
    async fn subscribe(
        &self,
        event: &str,
        listener: ListenerRef,
    ) -> Result<Subscription, PubsubError> {
        self.subscribe_handler(event, Handler::Plain(listener)).await
    }

    async fn subscribe_with_err(
        &self,
        event: &str,
        listener: ListenerWithErrRef,
    ) -> Result<Subscription, PubsubError> {
        self.subscribe_handler(event, Handler::WithErr(listener))
            .await
    }

    async fn publish(&self, event: &str, message: &[u8]) -> Result<(), PubsubError> {
        debug!(event, message_len = message.len(), "publish");
        match self.inner.transport.notify(event, message).await {
            Ok(()) => {
                self.inner.metrics.record_publish(true, message.len());
                Ok(())
            }
            Err(source) => {
                self.inner.metrics.record_publish(false, message.len());
                Err(PubsubError::Publish {
                    event: event.to_string(),
                    source,
                })
            }
        }
    }

    async fn close(&self) -> Result<(), PubsubError> {
        let inner = &self.inner;
        info!("pubsub is closing");
        inner.root.cancel();
        inner.registry.close_all();

        let res = inner
            .close_result
            .get_or_init(|| async { inner.transport.close().await })
            .await
            .clone();

        if let Some(h) = inner.listen_done.lock().await.take() {
            let _ = h.await;
        }
        debug!("pubsub closed");
        res.map_err(PubsubError::Close)
    }
}

impl Collector for NotifyPubsub {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.metrics.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let (subs, events) = self.inner.registry.counts();
        self.inner.metrics.set_current(subs, events);
        let families = self.inner.metrics.collect();
        self.spawn_latency_measure();
        families
    }
}

async fn receive_loop(
    mut stream: NotificationStream,
    registry: Arc<Registry>,
    metrics: Arc<PubsubMetrics>,
    colossal_threshold: usize,
    root: CancellationToken,
) {
    loop {
        let n = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            n = stream.recv() => match n {
                Some(n) => n,
                None => break,
            },
        };

        match n {
            Notification::Message { channel, payload } => {
                metrics.record_received(payload.len(), colossal_threshold);
                registry.route(&channel, &payload);
            }
            Notification::Reconnected => {
                debug!("notifying subscribers of a reconnection");
                metrics.set_connected(true);
                registry.mark_dropped();
            }
            Notification::Disconnected { reason } => {
                error!(%reason, "pubsub disconnected");
                metrics.record_disconnect();
            }
        }
    }
    info!("pubsub listen stopped receiving notify");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::{mpsc, Notify, Semaphore};

    use super::*;
    use crate::core::PubsubBuilder;
    use crate::listeners::{Delivery, ListenerFn, ListenerWithErrFn};
    use crate::transport::{LoopbackHub, LoopbackTransport};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn start(cfg: PubsubConfig) -> (NotifyPubsub, Arc<LoopbackTransport>) {
        init_tracing();
        let hub = LoopbackHub::new();
        let conn = hub.connect();
        let ps = PubsubBuilder::new(cfg)
            .with_transport(conn.clone())
            .build()
            .unwrap();
        (ps, conn)
    }

    fn plain(tx: mpsc::UnboundedSender<Bytes>) -> ListenerRef {
        ListenerFn::arc("plain", move |_ctx: CancellationToken, msg: Bytes| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
    }

    fn with_err(tx: mpsc::UnboundedSender<Delivery>) -> ListenerWithErrRef {
        ListenerWithErrFn::arc("with-err", move |_ctx: CancellationToken, d: Delivery| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(d);
            }
        })
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    async fn assert_idle<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(!matches!(extra, Ok(Some(_))), "unexpected delivery");
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    /// Loopback connection whose `listen`/`unlisten` can be held open.
    struct GatedTransport {
        conn: Arc<LoopbackTransport>,
        listen_gate: Option<Semaphore>,
        unlisten_gate: Option<Semaphore>,
        unlisten_entered: Notify,
    }

    impl GatedTransport {
        fn release_unlisten(&self) {
            if let Some(gate) = &self.unlisten_gate {
                gate.add_permits(1);
            }
        }
    }

    async fn pass(gate: &Option<Semaphore>) {
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn listen(&self, channel: &str) -> Result<(), TransportError> {
            pass(&self.listen_gate).await;
            self.conn.listen(channel).await
        }

        async fn unlisten(&self, channel: &str) -> Result<(), TransportError> {
            self.unlisten_entered.notify_one();
            pass(&self.unlisten_gate).await;
            self.conn.unlisten(channel).await
        }

        async fn notify(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
            self.conn.notify(channel, payload).await
        }

        fn take_notifications(&self) -> Option<NotificationStream> {
            self.conn.take_notifications()
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.conn.close().await
        }
    }

    fn start_gated(hold_listen: bool, hold_unlisten: bool) -> (NotifyPubsub, Arc<GatedTransport>) {
        init_tracing();
        let gated = Arc::new(GatedTransport {
            conn: LoopbackHub::new().connect(),
            listen_gate: hold_listen.then(|| Semaphore::new(0)),
            unlisten_gate: hold_unlisten.then(|| Semaphore::new(0)),
            unlisten_entered: Notify::new(),
        });
        let ps = PubsubBuilder::new(PubsubConfig::default())
            .with_transport(gated.clone())
            .build()
            .unwrap();
        (ps, gated)
    }

    fn sample(families: &[MetricFamily], name: &str) -> f64 {
        let family = families
            .iter()
            .find(|f| f.get_name() == name)
            .unwrap_or_else(|| panic!("missing metric {name}"));
        let metric = &family.get_metric()[0];
        match family.get_field_type() {
            prometheus::proto::MetricType::COUNTER => metric.get_counter().get_value(),
            _ => metric.get_gauge().get_value(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber_exactly_once() {
        let (ps, _conn) = start(PubsubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = ps.subscribe_with_err("test", with_err(tx)).await.unwrap();

        ps.publish("test", b"testing").await.unwrap();

        assert_eq!(recv(&mut rx).await.unwrap(), Bytes::from_static(b"testing"));
        assert_idle(&mut rx).await;

        sub.cancel().await;
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_for_other_events_are_ignored() {
        let (ps, _conn) = start(PubsubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = ps.subscribe("a", plain(tx)).await.unwrap();

        ps.publish("b", b"nope").await.unwrap();
        ps.publish("a", b"yes").await.unwrap();

        assert_eq!(recv(&mut rx).await, Bytes::from_static(b"yes"));
        assert_idle(&mut rx).await;
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_replicas_share_a_hub() {
        init_tracing();
        let hub = LoopbackHub::new();
        let a = PubsubBuilder::new(PubsubConfig::default())
            .with_transport(hub.connect())
            .build()
            .unwrap();
        let b = PubsubBuilder::new(PubsubConfig::default())
            .with_transport(hub.connect())
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = b.subscribe("replicas", plain(tx)).await.unwrap();
        a.publish("replicas", b"hello").await.unwrap();

        assert_eq!(recv(&mut rx).await, Bytes::from_static(b"hello"));
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_subscriber_tolerates_already_listening() {
        let (ps, conn) = start(PubsubConfig::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let s1 = ps.subscribe("ev", plain(tx1)).await.unwrap();
        let s2 = ps.subscribe("ev", plain(tx2)).await.unwrap();
        assert_eq!(conn.stats().listens, 1);

        ps.publish("ev", b"x").await.unwrap();
        assert_eq!(recv(&mut rx1).await, Bytes::from_static(b"x"));
        assert_eq!(recv(&mut rx2).await, Bytes::from_static(b"x"));

        s1.cancel().await;
        assert!(conn.is_listening("ev"));
        s2.cancel().await;
        assert!(!conn.is_listening("ev"));
        assert_eq!(conn.stats().unlistens, 1);
        assert_eq!(ps.metrics().current_events, 0);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_failure_cleans_up() {
        let (ps, conn) = start(PubsubConfig::default());
        conn.fail_next_listen(TransportError::Other("db down".into()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = ps.subscribe("ev", plain(tx)).await.unwrap_err();
        assert!(matches!(err, PubsubError::Listen { ref event, .. } if event == "ev"));

        let m = ps.metrics();
        assert_eq!(m.current_events, 0);
        assert_eq!(m.current_subscribers, 0);
        assert_eq!(m.subscribes_failed, 1);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_subscribe_during_listen_leaves_nothing() {
        let (ps, gated) = start_gated(true, false);
        let (tx, _rx) = mpsc::unbounded_channel();

        let res = tokio::time::timeout(Duration::from_millis(50), ps.subscribe("ev", plain(tx))).await;
        assert!(res.is_err());

        assert_eq!(ps.metrics().current_subscribers, 0);
        eventually(|| ps.metrics().current_events == 0).await;
        assert!(!gated.conn.is_listening("ev"));
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_wait_for_unlisten_leaves_nothing() {
        let (ps, gated) = start_gated(false, true);
        let first = ps
            .subscribe("ev", plain(mpsc::unbounded_channel().0))
            .await
            .unwrap();
        let cancel = tokio::spawn(first.cancel());
        gated.unlisten_entered.notified().await;

        let res = tokio::time::timeout(
            Duration::from_millis(20),
            ps.subscribe("ev", plain(mpsc::unbounded_channel().0)),
        )
        .await;
        assert!(res.is_err());
        let m = ps.metrics();
        assert_eq!(m.current_subscribers, 0);
        // still owned by the running unlisten
        assert_eq!(m.current_events, 1);

        gated.release_unlisten();
        cancel.await.unwrap();
        assert_eq!(ps.metrics().current_events, 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = ps.subscribe("ev", plain(tx)).await.unwrap();
        ps.publish("ev", b"fresh").await.unwrap();
        assert_eq!(recv(&mut rx).await, Bytes::from_static(b"fresh"));
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_resubscribe_waits_for_unlisten_in_progress() {
        let (ps, gated) = start_gated(false, true);
        let first = ps
            .subscribe("ev", plain(mpsc::unbounded_channel().0))
            .await
            .unwrap();
        let cancel = tokio::spawn(first.cancel());
        gated.unlisten_entered.notified().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ps2 = ps.clone();
        let second = tokio::spawn(async move { ps2.subscribe("ev", plain(tx)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        assert_eq!(gated.conn.stats().listens, 1);

        gated.release_unlisten();
        cancel.await.unwrap();
        let _sub = second.await.unwrap().unwrap();

        let stats = gated.conn.stats();
        assert_eq!(stats.unlistens, 1);
        assert_eq!(stats.listens, 2);
        assert!(gated.conn.is_listening("ev"));

        ps.publish("ev", b"after").await.unwrap();
        assert_eq!(recv(&mut rx).await, Bytes::from_static(b"after"));
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_collector_exports_counts_and_latency() {
        let (ps, _conn) = start(PubsubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = ps.subscribe("ev", plain(tx)).await.unwrap();
        ps.publish("ev", b"x").await.unwrap();
        recv(&mut rx).await;

        ps.measure_latency().await.unwrap();

        let registry = prometheus::Registry::new();
        registry.register(Box::new(ps.clone())).unwrap();
        let families = registry.gather();

        assert_eq!(sample(&families, "notifybus_pubsub_current_subscribers"), 1.0);
        assert_eq!(sample(&families, "notifybus_pubsub_current_events"), 1.0);
        assert_eq!(sample(&families, "notifybus_pubsub_connected"), 1.0);
        assert_eq!(sample(&families, "notifybus_pubsub_latency_measures_total"), 1.0);
        assert_eq!(sample(&families, "notifybus_pubsub_latency_measure_errs_total"), 0.0);
        assert!(sample(&families, "notifybus_pubsub_receive_latency_seconds") >= 0.0);

        // gathering started the next measurement
        eventually(|| ps.metrics().latency_measures == 2).await;
        assert_eq!(ps.metrics().latency_errors, 0);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlisten_failure_is_not_surfaced() {
        let (ps, conn) = start(PubsubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = ps.subscribe("ev", plain(tx)).await.unwrap();

        conn.fail_next_unlisten(TransportError::Other("flaky".into()));
        sub.cancel().await;

        assert_eq!(ps.metrics().current_events, 0);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_error_carries_event() {
        let (ps, conn) = start(PubsubConfig::default());
        conn.fail_next_notify(TransportError::Other("exec failed".into()));

        let err = ps.publish("usage", b"m").await.unwrap_err();
        assert!(matches!(err, PubsubError::Publish { ref event, .. } if event == "usage"));
        assert!(err.to_string().contains("exec failed"));

        let big = vec![b'x'; 9000];
        let err = ps.publish("usage", &big).await.unwrap_err();
        assert!(matches!(
            err,
            PubsubError::Publish {
                source: TransportError::PayloadTooLarge { .. },
                ..
            }
        ));
        assert_eq!(ps.metrics().publishes_failed, 2);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_marks_loss_for_error_aware_only() {
        let (ps, conn) = start(PubsubConfig::default());
        let (etx, mut erx) = mpsc::unbounded_channel();
        let (ptx, mut prx) = mpsc::unbounded_channel();
        let _a = ps.subscribe_with_err("ev", with_err(etx)).await.unwrap();
        let _b = ps.subscribe("other", plain(ptx)).await.unwrap();

        conn.inject_disconnect("connection reset").await;
        conn.inject_reconnect().await;
        ps.publish("ev", b"after").await.unwrap();

        assert!(recv(&mut erx).await.unwrap_err().is_dropped_messages());
        assert_eq!(recv(&mut erx).await.unwrap(), Bytes::from_static(b"after"));
        assert_idle(&mut prx).await;

        let m = ps.metrics();
        assert_eq!(m.disconnections, 1);
        assert!(m.connected);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_overflow_signals_loss_once() {
        const CAP: usize = 8;
        let (ps, _conn) = start(PubsubConfig {
            buffer_size: CAP,
            ..PubsubConfig::default()
        });

        let gate = Arc::new(tokio::sync::Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let g = Arc::clone(&gate);
        let l = ListenerWithErrFn::arc("gated", move |_ctx: CancellationToken, d: Delivery| {
            let tx = tx.clone();
            let g = Arc::clone(&g);
            async move {
                let first = matches!(&d, Ok(m) if m.as_ref() == b"block");
                let _ = tx.send(d);
                if first {
                    g.notified().await;
                }
            }
        });
        let _sub = ps.subscribe_with_err("ev", l).await.unwrap();

        ps.publish("ev", b"block").await.unwrap();
        assert_eq!(recv(&mut rx).await.unwrap(), Bytes::from_static(b"block"));

        for i in 0..CAP + 2 {
            ps.publish("ev", i.to_string().as_bytes()).await.unwrap();
        }
        // wait until the receive loop has routed everything
        for _ in 0..200 {
            if ps.metrics().messages_normal as usize == CAP + 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gate.notify_one();

        for i in 0..CAP - 1 {
            assert_eq!(recv(&mut rx).await.unwrap(), Bytes::from(i.to_string()));
        }
        assert!(recv(&mut rx).await.unwrap_err().is_dropped_messages());
        assert_idle(&mut rx).await;
        ps.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_cancel_balances_listens() {
        let (ps, conn) = start(PubsubConfig {
            buffer_size: 4,
            ..PubsubConfig::default()
        });

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..500 {
            let ps = ps.clone();
            tasks.spawn(async move {
                let l = ListenerFn::arc("race", |_ctx: CancellationToken, _m: Bytes| async {});
                let sub = ps.subscribe("race", l).await.unwrap();
                tokio::task::yield_now().await;
                sub.cancel().await;
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        let m = ps.metrics();
        assert_eq!(m.current_events, 0);
        assert_eq!(m.current_subscribers, 0);
        assert_eq!(m.subscribes_ok, 500);
        assert!(!conn.is_listening("race"));
        let stats = conn.stats();
        assert_eq!(stats.listens, stats.unlistens);
        assert!(stats.listens >= 1);
        ps.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_and_no_delivery_after_close() {
        let (ps, conn) = start(PubsubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = ps.subscribe("ev", plain(tx)).await.unwrap();

        ps.close().await.unwrap();
        assert!(ps.is_closed());
        // the cached result is returned again
        ps.close().await.unwrap();

        assert!(ps.publish("ev", b"late").await.is_err());
        assert_idle(&mut rx).await;
        assert!(matches!(
            ps.subscribe("ev", plain(mpsc::unbounded_channel().0)).await,
            Err(PubsubError::Closed)
        ));

        // cancelling after close still detaches cleanly
        sub.cancel().await;
        assert_eq!(ps.metrics().current_events, 0);
        assert!(!conn.is_listening("ev"));
    }

    #[tokio::test]
    async fn test_colossal_messages_are_classified() {
        let (ps, _conn) = start(PubsubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = ps.subscribe("big", plain(tx)).await.unwrap();

        ps.publish("big", &vec![b'a'; 7600]).await.unwrap();
        ps.publish("big", b"small").await.unwrap();
        recv(&mut rx).await;
        recv(&mut rx).await;

        let m = ps.metrics();
        assert_eq!(m.messages_colossal, 1);
        assert_eq!(m.messages_normal, 1);
        assert_eq!(m.received_bytes, 7605);
        assert_eq!(m.published_bytes, 7605);
        ps.close().await.unwrap();
    }
}
