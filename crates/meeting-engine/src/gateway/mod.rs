//! Videoserver gateway.
//!
//! `protocol` holds the wire types, `transport` posts them over HTTP, and
//! [`GatewayClient`] sequences the steps of each meeting-level operation
//! while keeping the gateway records in step with the videoserver.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::GatewayClient;
pub use transport::{HttpTransport, TransportConfig};
