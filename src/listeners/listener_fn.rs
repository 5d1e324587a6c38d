//! # Function-backed listeners
//!
//! [`ListenerFn`] and [`ListenerWithErrFn`] wrap closures returning a future,
//! producing a fresh future per delivery. Shared state goes in an explicit
//! `Arc<...>` captured by the closure.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::listener::{Delivery, Listener, ListenerWithErr};

/// Closure-backed [`Listener`].
#[derive(Debug)]
pub struct ListenerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ListenerFn<F> {
    /// Creates a new function-backed listener.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the listener and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Listener for ListenerFn<F>
where
    F: Fn(CancellationToken, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_message(&self, ctx: CancellationToken, message: Bytes) {
        (self.f)(ctx, message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Closure-backed [`ListenerWithErr`].
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use notifybus::{Delivery, ListenerWithErrFn, ListenerWithErrRef};
///
/// let l: ListenerWithErrRef = ListenerWithErrFn::arc("audit", |_ctx: CancellationToken, d: Delivery| async move {
///     if let Err(err) = d {
///         assert!(err.is_dropped_messages());
///     }
/// });
/// assert_eq!(l.name(), "audit");
/// ```
#[derive(Debug)]
pub struct ListenerWithErrFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ListenerWithErrFn<F> {
    /// Creates a new function-backed error-aware listener.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the listener and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> ListenerWithErr for ListenerWithErrFn<F>
where
    F: Fn(CancellationToken, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_delivery(&self, ctx: CancellationToken, delivery: Delivery) {
        (self.f)(ctx, delivery).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
