//! Request/reply RPC over the message bus.
//!
//! Requests arrive on a fan-out exchange as JSON [`Envelope`]s; each one
//! is handled on its own task and answered on the caller's `reply_to`
//! queue with the request's correlation id.

pub mod envelope;
pub mod worker;

pub use envelope::{Entity, Envelope, Reply, ReplyData, Status};
