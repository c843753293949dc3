//! Outbound RTMP publishing
//!
//! The [`OutboundConnectionManager`] turns push requests into published
//! streams on remote servers, one connection task per (host, port, app).

pub mod config;
pub mod connector;
pub mod manager;

pub use config::OutboundConfig;
pub use connector::{ConnectionKey, PushRequest};
pub use manager::OutboundConnectionManager;
