//! Pubsub core: contract, registry, facade and lifecycle.
//!
//! Internal modules:
//! - [`pubsub`]: the [`Pubsub`] trait shared by every implementation;
//! - [`subscription`]: cancel handle returned by `subscribe*`;
//! - [`registry`]: event → subscriber queues with listen/unlisten reference counting;
//! - [`notify`]: [`NotifyPubsub`], the transport-backed facade;
//! - [`builder`]: [`PubsubBuilder`].

mod builder;
mod notify;
mod pubsub;
mod registry;
mod subscription;

pub use builder::PubsubBuilder;
pub use notify::NotifyPubsub;
pub use pubsub::{Pubsub, PubsubRef};
pub use subscription::Subscription;
