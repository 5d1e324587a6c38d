//! # Message listeners.
//!
//! A subscriber holds exactly one of two callback shapes:
//! - [`Listener`]: receives message payloads only; loss is invisible to it.
//! - [`ListenerWithErr`]: receives `Ok(payload)` or `Err(PubsubError::DroppedMessages)`.
//!
//! Both are driven by a dedicated delivery worker per subscription, so a slow
//! listener never blocks the notification path or other subscribers.
//!
//! ## Closure adapters
//! ```rust
//! use bytes::Bytes;
//! use tokio_util::sync::CancellationToken;
//! use notifybus::{ListenerFn, ListenerRef};
//!
//! let l: ListenerRef = ListenerFn::arc("printer", |_ctx: CancellationToken, msg: Bytes| async move {
//!     let _ = msg.len();
//! });
//! assert_eq!(l.name(), "printer");
//! ```

mod handler;
mod listener;
mod listener_fn;

pub(crate) use handler::Handler;
pub use listener::{Delivery, Listener, ListenerRef, ListenerWithErr, ListenerWithErrRef};
pub use listener_fn::{ListenerFn, ListenerWithErrFn};
