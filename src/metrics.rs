//! # Pubsub metrics.
//!
//! [`PubsubMetrics`] holds the Prometheus collectors owned by one
//! [`NotifyPubsub`](crate::NotifyPubsub). The facade implements
//! [`prometheus::core::Collector`], so it can be registered with any
//! [`prometheus::Registry`].
//!
//! ## Metrics exported
//! - `notifybus_pubsub_publishes_total{success}` - calls to `publish`
//! - `notifybus_pubsub_subscribes_total{success}` - calls to `subscribe*`
//! - `notifybus_pubsub_messages_total{size}` - received messages by size class
//! - `notifybus_pubsub_published_bytes_total` - bytes successfully published
//! - `notifybus_pubsub_received_bytes_total` - bytes received
//! - `notifybus_pubsub_disconnections_total` - unexpected disconnects
//! - `notifybus_pubsub_connected` - 1 while the connection is up
//! - `notifybus_pubsub_current_subscribers` - live subscriptions (computed at collect)
//! - `notifybus_pubsub_current_events` - channels listened for (computed at collect)
//! - `notifybus_pubsub_send_latency_seconds` - last measured publish duration
//! - `notifybus_pubsub_receive_latency_seconds` - last measured round trip
//! - `notifybus_pubsub_latency_measures_total` - latency measurements
//! - `notifybus_pubsub_latency_measure_errs_total` - failed latency measurements

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts};

use crate::error::PubsubError;
use crate::latency::Latency;

const NAMESPACE: &str = "notifybus";
const SUBSYSTEM: &str = "pubsub";

/// Size class of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Below the colossal threshold.
    Normal,
    /// At or above the colossal threshold (close to the notify limit).
    Colossal,
}

impl SizeClass {
    /// Classifies a payload length against `threshold`.
    #[inline]
    pub fn of(len: usize, threshold: usize) -> Self {
        if len >= threshold {
            SizeClass::Colossal
        } else {
            SizeClass::Normal
        }
    }

    /// Stable label value of the `size` label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SizeClass::Normal => "normal",
            SizeClass::Colossal => "colossal",
        }
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

fn success(ok: bool) -> &'static str {
    if ok {
        "true"
    } else {
        "false"
    }
}

/// Collectors owned by a pubsub instance.
pub(crate) struct PubsubMetrics {
    publishes: IntCounterVec,
    subscribes: IntCounterVec,
    messages: IntCounterVec,
    published_bytes: IntCounter,
    received_bytes: IntCounter,
    disconnections: IntCounter,
    connected: IntGauge,
    current_subscribers: IntGauge,
    current_events: IntGauge,
    send_latency: Gauge,
    recv_latency: Gauge,
    latency_measures: IntCounter,
    latency_errors: IntCounter,
}

impl PubsubMetrics {
    pub(crate) fn new() -> prometheus::Result<Self> {
        Ok(Self {
            publishes: IntCounterVec::new(
                opts("publishes_total", "Total number of calls to publish"),
                &["success"],
            )?,
            subscribes: IntCounterVec::new(
                opts(
                    "subscribes_total",
                    "Total number of calls to subscribe/subscribe_with_err",
                ),
                &["success"],
            )?,
            messages: IntCounterVec::new(
                opts(
                    "messages_total",
                    "Total number of messages received from the transport",
                ),
                &["size"],
            )?,
            published_bytes: IntCounter::with_opts(opts(
                "published_bytes_total",
                "Total number of bytes successfully published across all publishes",
            ))?,
            received_bytes: IntCounter::with_opts(opts(
                "received_bytes_total",
                "Total number of bytes received across all messages",
            ))?,
            disconnections: IntCounter::with_opts(opts(
                "disconnections_total",
                "Total number of times the transport disconnected unexpectedly",
            ))?,
            connected: IntGauge::with_opts(opts(
                "connected",
                "Whether the transport is connected (1) or not (0)",
            ))?,
            current_subscribers: IntGauge::with_opts(opts(
                "current_subscribers",
                "The current number of active pubsub subscribers",
            ))?,
            current_events: IntGauge::with_opts(opts(
                "current_events",
                "The current number of pubsub event channels listened for",
            ))?,
            send_latency: Gauge::with_opts(opts(
                "send_latency_seconds",
                "The time taken to send a message into a pubsub event channel",
            ))?,
            recv_latency: Gauge::with_opts(opts(
                "receive_latency_seconds",
                "The time taken to receive a message from a pubsub event channel",
            ))?,
            latency_measures: IntCounter::with_opts(opts(
                "latency_measures_total",
                "The number of pubsub latency measurements",
            ))?,
            latency_errors: IntCounter::with_opts(opts(
                "latency_measure_errs_total",
                "The number of pubsub latency measurement failures",
            ))?,
        })
    }

    pub(crate) fn record_publish(&self, ok: bool, len: usize) {
        self.publishes.with_label_values(&[success(ok)]).inc();
        if ok {
            self.published_bytes.inc_by(len as u64);
        }
    }

    pub(crate) fn record_subscribe(&self, ok: bool) {
        self.subscribes.with_label_values(&[success(ok)]).inc();
    }

    pub(crate) fn record_received(&self, len: usize, threshold: usize) {
        self.messages
            .with_label_values(&[SizeClass::of(len, threshold).as_label()])
            .inc();
        self.received_bytes.inc_by(len as u64);
    }

    pub(crate) fn set_connected(&self, up: bool) {
        self.connected.set(i64::from(up));
    }

    pub(crate) fn record_disconnect(&self) {
        self.connected.set(0);
        self.disconnections.inc();
    }

    /// Counts a measurement; latency gauges keep their last good value on failure.
    pub(crate) fn record_latency(&self, res: &Result<Latency, PubsubError>) {
        self.latency_measures.inc();
        match res {
            Ok(lat) => {
                self.send_latency.set(lat.send.as_secs_f64());
                self.recv_latency.set(lat.recv.as_secs_f64());
            }
            Err(_) => self.latency_errors.inc(),
        }
    }

    /// Refreshes the gauges computed from the registry.
    pub(crate) fn set_current(&self, subscribers: usize, events: usize) {
        self.current_subscribers.set(subscribers as i64);
        self.current_events.set(events as i64);
    }

    fn collectors(&self) -> [&dyn Collector; 13] {
        [
            &self.publishes,
            &self.subscribes,
            &self.messages,
            &self.published_bytes,
            &self.received_bytes,
            &self.disconnections,
            &self.connected,
            &self.current_subscribers,
            &self.current_events,
            &self.send_latency,
            &self.recv_latency,
            &self.latency_measures,
            &self.latency_errors,
        ]
    }

    pub(crate) fn desc(&self) -> Vec<&Desc> {
        self.collectors()
            .into_iter()
            .flat_map(|c| c.desc())
            .collect()
    }

    pub(crate) fn collect(&self) -> Vec<MetricFamily> {
        self.collectors()
            .into_iter()
            .flat_map(|c| c.collect())
            .collect()
    }

    pub(crate) fn snapshot(&self, current_subscribers: usize, current_events: usize) -> MetricsSnapshot {
        let count = |v: &IntCounterVec, label: &str| v.with_label_values(&[label]).get();
        MetricsSnapshot {
            current_subscribers,
            current_events,
            connected: self.connected.get() == 1,
            publishes_ok: count(&self.publishes, "true"),
            publishes_failed: count(&self.publishes, "false"),
            subscribes_ok: count(&self.subscribes, "true"),
            subscribes_failed: count(&self.subscribes, "false"),
            messages_normal: count(&self.messages, SizeClass::Normal.as_label()),
            messages_colossal: count(&self.messages, SizeClass::Colossal.as_label()),
            published_bytes: self.published_bytes.get(),
            received_bytes: self.received_bytes.get(),
            disconnections: self.disconnections.get(),
            latency_measures: self.latency_measures.get(),
            latency_errors: self.latency_errors.get(),
        }
    }
}

/// Point-in-time view of a pubsub's counters, for callers without a
/// Prometheus registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Live subscriptions across all channels.
    pub current_subscribers: usize,
    /// Channels with a registry entry.
    pub current_events: usize,
    /// Whether the transport connection is up.
    pub connected: bool,
    /// Successful `publish` calls.
    pub publishes_ok: u64,
    /// Failed `publish` calls.
    pub publishes_failed: u64,
    /// Successful `subscribe*` calls.
    pub subscribes_ok: u64,
    /// Failed `subscribe*` calls.
    pub subscribes_failed: u64,
    /// Received messages in the `normal` size class.
    pub messages_normal: u64,
    /// Received messages in the `colossal` size class.
    pub messages_colossal: u64,
    /// Payload bytes successfully published.
    pub published_bytes: u64,
    /// Payload bytes received.
    pub received_bytes: u64,
    /// Unexpected disconnects.
    pub disconnections: u64,
    /// Latency measurements run.
    pub latency_measures: u64,
    /// Latency measurements that failed.
    pub latency_errors: u64,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .unwrap_or_else(|| panic!("missing metric {name}"))
    }

    #[test]
    fn test_size_class_boundary() {
        assert_eq!(SizeClass::of(7599, 7600), SizeClass::Normal);
        assert_eq!(SizeClass::of(7600, 7600), SizeClass::Colossal);
        assert_eq!(SizeClass::Colossal.as_label(), "colossal");
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = PubsubMetrics::new().unwrap();
        m.set_connected(true);
        m.record_publish(true, 10);
        m.record_publish(false, 99);
        m.record_received(8000, 7600);
        m.record_received(5, 7600);
        m.record_disconnect();

        let s = m.snapshot(3, 2);
        assert_eq!(s.current_subscribers, 3);
        assert_eq!(s.current_events, 2);
        assert!(!s.connected);
        assert_eq!(s.publishes_ok, 1);
        assert_eq!(s.publishes_failed, 1);
        assert_eq!(s.published_bytes, 10);
        assert_eq!(s.messages_colossal, 1);
        assert_eq!(s.messages_normal, 1);
        assert_eq!(s.received_bytes, 8005);
        assert_eq!(s.disconnections, 1);
    }

    #[test]
    fn test_collect_exports_labeled_families() {
        let m = PubsubMetrics::new().unwrap();
        m.record_publish(true, 3);
        m.record_subscribe(false);
        m.record_received(7600, 7600);
        m.set_current(4, 2);

        let families = m.collect();
        assert_eq!(m.desc().len(), 13);

        let publishes = family(&families, "notifybus_pubsub_publishes_total");
        let metric = &publishes.get_metric()[0];
        assert_eq!(metric.get_label()[0].get_name(), "success");
        assert_eq!(metric.get_label()[0].get_value(), "true");
        assert_eq!(metric.get_counter().get_value() as u64, 1);

        let messages = family(&families, "notifybus_pubsub_messages_total");
        assert_eq!(messages.get_metric()[0].get_label()[0].get_value(), "colossal");

        let subs = family(&families, "notifybus_pubsub_current_subscribers");
        assert_eq!(subs.get_metric()[0].get_gauge().get_value() as i64, 4);
        let events = family(&families, "notifybus_pubsub_current_events");
        assert_eq!(events.get_metric()[0].get_gauge().get_value() as i64, 2);
    }

    #[test]
    fn test_failed_latency_keeps_last_gauges() {
        let m = PubsubMetrics::new().unwrap();
        m.record_latency(&Ok(Latency {
            send: Duration::from_millis(2),
            recv: Duration::from_millis(5),
        }));
        m.record_latency(&Err(PubsubError::LatencyTimeout {
            timeout: Duration::from_secs(10),
        }));

        let s = m.snapshot(0, 0);
        assert_eq!(s.latency_measures, 2);
        assert_eq!(s.latency_errors, 1);

        let families = m.collect();
        let recv = family(&families, "notifybus_pubsub_receive_latency_seconds");
        assert!((recv.get_metric()[0].get_gauge().get_value() - 0.005).abs() < 1e-9);
    }
}
