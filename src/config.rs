//! # Pubsub and watchdog configuration.
//!
//! Provides [`PubsubConfig`] for the database-backed facade and
//! [`WatchdogConfig`] for the heartbeat monitor.
//!
//! ## Sentinel values
//! - `buffer_size = 0` → clamped to 1
//! - `timeout < heartbeat` → clamped to `heartbeat`

use std::time::Duration;

/// Reserved channel carrying watchdog heartbeats.
///
/// Collaborators must not pick this name for their own events.
pub const WATCHDOG_CHANNEL: &str = "pubsub_watchdog";

/// Configuration for [`NotifyPubsub`](crate::NotifyPubsub).
///
/// ## Field semantics
/// - `buffer_size`: slots per subscriber queue before messages are dropped (min 1)
/// - `colossal_threshold`: received payloads of at least this many bytes are
///   counted in the `colossal` size class
/// - `latency_timeout`: deadline of the latency measurement run on metric collection
#[derive(Clone, Debug)]
pub struct PubsubConfig {
    /// Maximum number of undelivered messages buffered per subscriber.
    ///
    /// When a queue is full the newest slot is replaced by a loss marker.
    pub buffer_size: usize,

    /// Size-class boundary for received message metrics (95% of the notify limit).
    pub colossal_threshold: usize,

    /// How long a latency measurement may take before it counts as failed.
    pub latency_timeout: Duration,
}

impl PubsubConfig {
    /// Returns the queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn buffer_size_clamped(&self) -> usize {
        self.buffer_size.max(1)
    }
}

impl Default for PubsubConfig {
    /// Default configuration:
    ///
    /// - `buffer_size = 2048`
    /// - `colossal_threshold = 7600`
    /// - `latency_timeout = 10s`
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            colossal_threshold: 7600,
            latency_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for [`Watchdog`](crate::Watchdog).
#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    /// How often a heartbeat is published.
    pub heartbeat: Duration,

    /// How long without any received heartbeat before the watchdog times out.
    pub timeout: Duration,
}

impl WatchdogConfig {
    /// Returns the timeout, never shorter than one heartbeat period.
    #[inline]
    pub fn timeout_clamped(&self) -> Duration {
        self.timeout.max(self.heartbeat)
    }
}

impl Default for WatchdogConfig {
    /// Default configuration:
    ///
    /// - `heartbeat = 15s`
    /// - `timeout = 5min`
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}
