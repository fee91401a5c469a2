//! Broker connectivity: wire format and client connection.

pub mod client;
pub mod wire;

pub use client::{BrokerClient, InboundMessage};
pub use wire::Frame;
