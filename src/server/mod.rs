//! Inbound side: listeners and ingest sessions

pub mod config;
pub mod flv_session;
pub mod listener;
pub mod rtsp_session;
pub mod session;

pub use config::ServerConfig;
pub use listener::{BoundListener, RelayServer};
pub use session::RtmpSession;
