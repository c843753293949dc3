//! Live stream relay core
//!
//! Inbound streams arrive over RTMP, live FLV or RTP, are registered in a
//! [`registry::StreamsManager`] and mirrored by the
//! [`application::ProxyPublishApplication`] to configured RTMP target servers.
//!
//! ```text
//!  publisher ──► RelayServer ──► session ──► handler.open_stream()
//!                                                 │
//!                                          StreamsManager ──► on_stream_registered
//!                                                                    │
//!                                            forwarding pass over target servers
//!                                                                    │
//!                      OutboundConnectionManager ◄── push_local_stream()
//!                                 │
//!                        remote RTMP server
//! ```
//!
//! The [`atom`] module is a standalone parser for MP4-family containers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rtmp_relay::application::{ApplicationConfig, ProxyPublishApplication};
//! use rtmp_relay::handler::HandlerRegistry;
//! use rtmp_relay::registry::StreamsManager;
//! use rtmp_relay::server::{RelayServer, ServerConfig};
//!
//! # async fn run() -> rtmp_relay::Result<()> {
//! let config = ApplicationConfig::from_json_str(
//!     r#"{ "abortOnConnectError": false,
//!          "targetServers": { "backup": { "targetUri": "rtmp://backup.example.com/live" } } }"#,
//! )?;
//! let registry = Arc::new(HandlerRegistry::new());
//! let streams = Arc::new(StreamsManager::new());
//! let _app = ProxyPublishApplication::initialize(config, Arc::clone(&registry), streams)?;
//!
//! RelayServer::new(ServerConfig::default(), registry).run().await
//! # }
//! ```

pub mod amf;
pub mod application;
pub mod atom;
pub mod client;
pub mod error;
pub mod handler;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
