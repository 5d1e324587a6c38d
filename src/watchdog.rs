//! # Heartbeat watchdog for the pubsub path.
//!
//! Detects a silently broken notification path: this replica keeps
//! publishing heartbeats on [`WATCHDOG_CHANNEL`] and expects to hear *some*
//! heartbeat (its own or another replica's) within the timeout.
//!
//! ## Architecture
//! ```text
//! publish loop:   publish(heartbeat) now, then every `heartbeat` period
//! monitor loop:   subscribe(WATCHDOG_CHANNEL)
//!                   ├─ subscribe failed        ─► TimedOut
//!                   ├─ heartbeat received      ─► reset timer
//!                   └─ timer fired (`timeout`) ─► log diagnostics ─► TimedOut
//! ```
//!
//! ## Rules
//! - `Healthy → TimedOut` is one-way; the watchdog takes no other action.
//!   Callers wait on [`Watchdog::timeout`] next to their own shutdown signal.
//! - [`Watchdog::close`] stops both loops and waits for them; it never times out the watchdog.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, warn};

use crate::config::{WatchdogConfig, WATCHDOG_CHANNEL};
use crate::core::PubsubRef;
use crate::listeners::ListenerFn;

/// Heartbeat-based liveness monitor over a [`Pubsub`](crate::Pubsub).
pub struct Watchdog {
    stop: CancellationToken,
    timed_out: CancellationToken,
    loops: Mutex<Option<JoinSet<()>>>,
}

impl Watchdog {
    /// Starts publishing and monitoring heartbeats on `pubsub`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(pubsub: PubsubRef, cfg: WatchdogConfig) -> Self {
        let stop = CancellationToken::new();
        let timed_out = CancellationToken::new();

        let mut loops = JoinSet::new();
        loops.spawn(publish_loop(Arc::clone(&pubsub), cfg.heartbeat, stop.clone()));
        loops.spawn(monitor_loop(
            pubsub,
            cfg.timeout_clamped(),
            stop.clone(),
            timed_out.clone(),
        ));

        Self {
            stop,
            timed_out,
            loops: Mutex::new(Some(loops)),
        }
    }

    /// Completes once the watchdog has timed out. Fatal by contract.
    pub fn timeout(&self) -> WaitForCancellationFuture<'_> {
        self.timed_out.cancelled()
    }

    /// True once the watchdog has timed out.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.is_cancelled()
    }

    /// Stops both loops and waits for them to exit.
    pub async fn close(&self) {
        self.stop.cancel();
        let loops = self.loops.lock().take();
        if let Some(mut set) = loops {
            while set.join_next().await.is_some() {}
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn publish_loop(pubsub: PubsubRef, period: Duration, stop: CancellationToken) {
    // first beat right away
    heartbeat(&pubsub).await;

    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => heartbeat(&pubsub).await,
        }
    }
}

async fn heartbeat(pubsub: &PubsubRef) {
    debug!("publishing heartbeat");
    if let Err(err) = pubsub.publish(WATCHDOG_CHANNEL, &[]).await {
        warn!(error = %err, "failed to publish heartbeat");
    }
}

async fn monitor_loop(
    pubsub: PubsubRef,
    timeout: Duration,
    stop: CancellationToken,
    timed_out: CancellationToken,
) {
    let (tx, mut beats) = mpsc::channel::<()>(1);
    let listener = ListenerFn::arc("watchdog", move |_ctx: CancellationToken, _msg: Bytes| {
        // a full channel already holds a pending reset
        let _ = tx.try_send(());
        async {}
    });

    let sub = match pubsub.subscribe(WATCHDOG_CHANNEL, listener).await {
        Ok(sub) => sub,
        Err(err) => {
            error!(error = %err, "watchdog failed to subscribe");
            timed_out.cancel();
            return;
        }
    };

    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            Some(()) = beats.recv() => {
                debug!("got heartbeat");
                deadline.as_mut().reset(Instant::now() + timeout);
            }
            _ = &mut deadline => {
                report_timeout(timeout);
                timed_out.cancel();
                break;
            }
        }
    }
    sub.cancel().await;
}

fn report_timeout(timeout: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            let m = rt.metrics();
            error!(
                ?timeout,
                workers = m.num_workers(),
                alive_tasks = m.num_alive_tasks(),
                "watchdog timeout: no heartbeat received"
            );
        }
        Err(_) => error!(?timeout, "watchdog timeout: no heartbeat received"),
    }
}
