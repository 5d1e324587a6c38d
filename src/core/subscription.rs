//! # Subscription handle.
//!
//! Returned by every `subscribe*` call. [`Subscription::cancel`] detaches the
//! listener and, for the last subscriber of a channel, unlistens.
//!
//! Dropping a handle without cancelling spawns the cancellation on the
//! current tokio runtime (if any), so a forgotten handle does not leak its
//! delivery worker.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

type CancelFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Live subscription to one event.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    event: String,
    cancel: Option<CancelFn>,
}

impl Subscription {
    /// Wraps a cancellation routine.
    ///
    /// For [`Pubsub`](crate::Pubsub) implementors; callers receive handles from `subscribe*`.
    pub fn new<F, Fut>(event: impl Into<String>, cancel: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            event: event.into(),
            cancel: Some(Box::new(move || cancel().boxed())),
        }
    }

    /// Event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Cancels the subscription and waits for the cleanup to finish.
    ///
    /// No further deliveries start once this returns.
    pub async fn cancel(mut self) {
        if let Some(f) = self.cancel.take() {
            f().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(f) = self.cancel.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(f());
            }
            Err(_) => {
                warn!(event = %self.event, "subscription dropped outside a runtime; not cancelled");
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
