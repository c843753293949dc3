//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::handler::ProtocolType;
use crate::protocol::constants::*;

/// Application name given to live FLV streams, which carry none on the wire
pub const DEFAULT_LIVE_FLV_APP: &str = "live";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTMP ingest address (None = no RTMP listener)
    pub rtmp_addr: Option<SocketAddr>,

    /// Live FLV over TCP ingest address (None = no FLV listener)
    pub live_flv_addr: Option<SocketAddr>,

    /// RTSP (RECORD) ingest address (None = no RTSP listener)
    pub rtsp_addr: Option<SocketAddr>,

    /// Application live FLV streams are opened in
    pub live_flv_app: String,

    /// Maximum concurrent connections over all listeners (0 = unlimited)
    pub max_connections: usize,

    /// Chunk size to negotiate with clients
    pub chunk_size: u32,

    /// Window acknowledgement size
    pub window_ack_size: u32,

    /// Peer bandwidth limit
    pub peer_bandwidth: u32,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Disconnect if no data is received for this long
    pub idle_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rtmp_addr: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_RTMP_PORT))),
            live_flv_addr: None,
            rtsp_addr: None,
            live_flv_app: DEFAULT_LIVE_FLV_APP.to_string(),
            max_connections: 0,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Set the RTMP bind address
    pub fn rtmp(mut self, addr: SocketAddr) -> Self {
        self.rtmp_addr = Some(addr);
        self
    }

    /// Don't listen for RTMP
    pub fn without_rtmp(mut self) -> Self {
        self.rtmp_addr = None;
        self
    }

    /// Set the live FLV bind address
    pub fn live_flv(mut self, addr: SocketAddr) -> Self {
        self.live_flv_addr = Some(addr);
        self
    }

    /// Set the RTSP bind address
    pub fn rtsp(mut self, addr: SocketAddr) -> Self {
        self.rtsp_addr = Some(addr);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Listeners to open, one per protocol tag
    pub fn listeners(&self) -> Vec<(ProtocolType, SocketAddr)> {
        let mut listeners = Vec::with_capacity(3);
        if let Some(addr) = self.rtmp_addr {
            listeners.push((ProtocolType::InboundRtmp, addr));
        }
        if let Some(addr) = self.live_flv_addr {
            listeners.push((ProtocolType::InboundLiveFlv, addr));
        }
        if let Some(addr) = self.rtsp_addr {
            listeners.push((ProtocolType::Rtsp, addr));
        }
        listeners
    }

    /// Read the optional `server` section of the configuration document
    ///
    /// ```json
    /// { "rtmpBind": "0.0.0.0:1935", "liveFlvBind": "0.0.0.0:6666", "rtspBind": "0.0.0.0:554",
    ///   "liveFlvApp": "live", "maxConnections": 100, "chunkSize": 4096 }
    /// ```
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value.as_object().ok_or_else(|| ConfigError::InvalidValue {
            key: "server".into(),
            value: value.to_string(),
        })?;
        let mut config = Self::default();

        if let Some(addr) = socket_addr(map, "rtmpBind")? {
            config.rtmp_addr = addr;
        }
        if let Some(addr) = socket_addr(map, "liveFlvBind")? {
            config.live_flv_addr = addr;
        }
        if let Some(addr) = socket_addr(map, "rtspBind")? {
            config.rtsp_addr = addr;
        }
        if let Some(value) = map.get("liveFlvApp") {
            config.live_flv_app = value
                .as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid("server.liveFlvApp", value))?
                .to_string();
        }
        if let Some(value) = map.get("maxConnections") {
            let max = value
                .as_u64()
                .ok_or_else(|| invalid("server.maxConnections", value))?;
            config.max_connections = max as usize;
        }
        if let Some(value) = map.get("chunkSize") {
            let size = value
                .as_u64()
                .filter(|s| *s >= u64::from(DEFAULT_CHUNK_SIZE) && *s <= u64::from(MAX_CHUNK_SIZE))
                .ok_or_else(|| invalid("server.chunkSize", value))?;
            config.chunk_size = size as u32;
        }
        if let Some(value) = map.get("idleTimeoutMs") {
            let ms = value
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid("server.idleTimeoutMs", value))?;
            config.idle_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// `null` disables the listener
fn socket_addr(
    map: &Map<String, Value>,
    key: &str,
) -> Result<Option<Option<SocketAddr>>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(value) => value
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(|addr| Some(Some(addr)))
            .ok_or_else(|| invalid(&format!("server.{}", key), value)),
    }
}

fn invalid(key: &str, value: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.rtmp_addr.unwrap().port(), 1935);
        assert!(config.live_flv_addr.is_none());
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.chunk_size, RECOMMENDED_CHUNK_SIZE);
        assert_eq!(config.window_ack_size, DEFAULT_WINDOW_ACK_SIZE);
        assert!(config.tcp_nodelay);
        assert_eq!(config.listeners().len(), 1);
    }

    #[test]
    fn test_builder_chaining() {
        let rtmp: SocketAddr = "127.0.0.1:1936".parse().unwrap();
        let flv: SocketAddr = "127.0.0.1:6666".parse().unwrap();
        let config = ServerConfig::default()
            .rtmp(rtmp)
            .live_flv(flv)
            .max_connections(50)
            .chunk_size(u32::MAX)
            .idle_timeout(Duration::from_secs(30));

        assert_eq!(
            config.listeners(),
            vec![
                (ProtocolType::InboundRtmp, rtmp),
                (ProtocolType::InboundLiveFlv, flv)
            ]
        );
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rtsp_listener() {
        let rtsp: SocketAddr = "127.0.0.1:8554".parse().unwrap();
        let config = ServerConfig::default().without_rtmp().rtsp(rtsp);
        assert_eq!(config.listeners(), vec![(ProtocolType::Rtsp, rtsp)]);

        let config = ServerConfig::from_value(&json!({ "rtspBind": "127.0.0.1:8554" })).unwrap();
        assert_eq!(config.rtsp_addr, Some(rtsp));
        assert_eq!(config.listeners().len(), 2);
    }

    #[test]
    fn test_without_rtmp() {
        let config = ServerConfig::default().without_rtmp();
        assert!(config.listeners().is_empty());
    }

    #[test]
    fn test_from_value() {
        let config = ServerConfig::from_value(&json!({
            "rtmpBind": null,
            "liveFlvBind": "127.0.0.1:6666",
            "liveFlvApp": "flv",
            "maxConnections": 10
        }))
        .unwrap();

        assert!(config.rtmp_addr.is_none());
        assert_eq!(config.live_flv_addr.unwrap().port(), 6666);
        assert_eq!(config.live_flv_app, "flv");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_from_value_invalid() {
        let err = ServerConfig::from_value(&json!({ "rtmpBind": "not an address" })).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "server.rtmpBind".into(),
                value: "\"not an address\"".into(),
            }
        );

        assert!(ServerConfig::from_value(&json!({ "chunkSize": 1 })).is_err());
    }
}
