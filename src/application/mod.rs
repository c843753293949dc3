//! Applications consuming inbound streams

pub mod base;
pub mod config;
pub mod proxy;

pub use base::{BaseApplication, SignalledStream};
pub use config::{
    ApplicationConfig, ForwardParams, TargetDescriptor, TargetServerSet, TargetUri,
    DEFAULT_APP_NAME, DEFAULT_USER_AGENT,
};
pub use proxy::{ForwardingPass, ProxyPublishApplication, TargetState};
