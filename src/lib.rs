//! Zonewarden
//!
//! A record-management worker for authoritative DNS databases following
//! the PowerDNS schema. An HTTP front-end (not part of this crate) turns
//! REST calls into signed JSON envelopes and publishes them on an AMQP
//! fan-out exchange; each worker authenticates the caller against a
//! token store fed from static configuration and a Vault-style secret
//! store, authorizes the command against per-token capabilities,
//! validates the records against per-type DNS rules, and applies the
//! change transactionally across every database configured for the
//! requested view, bumping the zone's SOA serial as it goes. Replies are
//! published back on the caller's queue with the request's correlation
//! id.
//!
#![warn(clippy::pedantic)]

pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod model;
pub mod serial;
pub mod store;
pub mod validate;

pub use config::{Config, SharedConfig};
pub use error::Error;
