//! Per-subscriber queues.
//!
//! - `Ring`: fixed slot storage with loss marking on overflow
//! - `MsgQueue`: ring + dedicated delivery worker

mod msg_queue;
mod ring;

pub(crate) use msg_queue::MsgQueue;
pub(crate) use ring::Slot;
