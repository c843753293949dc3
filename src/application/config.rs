//! Proxy-publish application configuration
//!
//! ```json
//! {
//!   "name": "proxypublish",
//!   "abortOnConnectError": true,
//!   "targetServers": {
//!     "primary": {
//!       "targetUri": "rtmp://backup.example.com:1935/live",
//!       "localStreamName": "cam1",
//!       "targetStreamName": "backup",
//!       "emulateUserAgent": "FMLE/3.0 (compatible; FMSc/1.0)"
//!     }
//!   },
//!   "outbound": { "connectTimeoutMs": 5000, "chunkSize": 4096, "reuseConnections": true }
//! }
//! ```
//!
//! Targets keep the order they have in the document.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::Url;

use crate::client::OutboundConfig;
use crate::error::ConfigError;
use crate::protocol::constants::{DEFAULT_RTMP_PORT, MAX_CHUNK_SIZE};

/// Application name used when the document has none
pub const DEFAULT_APP_NAME: &str = "proxypublish";

/// `flashVer` sent on outbound connects unless a target overrides it
pub const DEFAULT_USER_AGENT: &str = concat!("rtmp-relay/", env!("CARGO_PKG_VERSION"));

/// Target URI schemes must start with this (`rtmp`, `rtmps`, `rtmpt`, ...)
pub const RTMP_SCHEME_FAMILY: &str = "rtmp";

/// Whether `scheme` belongs to the RTMP family
pub fn is_rtmp_family(scheme: &str) -> bool {
    scheme.starts_with(RTMP_SCHEME_FAMILY)
}

/// Parsed target URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUri {
    full: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path without leading and trailing `/`
    pub app: String,
    pub query: Option<String>,
}

impl TargetUri {
    /// Parse `uri` for the target called `target` (used in errors)
    pub fn parse(target: &str, uri: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidUri {
            target: target.to_string(),
            uri: uri.to_string(),
        };

        let parsed = Url::parse(uri).map_err(|_| invalid())?;
        let scheme = parsed.scheme().to_ascii_lowercase();
        if !is_rtmp_family(&scheme) {
            return Err(ConfigError::UnsupportedScheme {
                target: target.to_string(),
                scheme,
            });
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        Ok(Self {
            full: uri.to_string(),
            scheme,
            host,
            port: parsed.port().unwrap_or(DEFAULT_RTMP_PORT),
            app: parsed.path().trim_matches('/').to_string(),
            query: parsed.query().map(str::to_string),
        })
    }

    /// The URI as configured
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// `tcUrl` for the RTMP connect command
    pub fn tc_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut tc_url = format!("{}://{}:{}/{}", self.scheme, host, self.port, self.app);
        if let Some(query) = &self.query {
            tc_url.push('?');
            tc_url.push_str(query);
        }
        tc_url
    }
}

impl fmt::Display for TargetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// One configured downstream server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub target_uri: TargetUri,
    /// Only forward inbound streams with this name
    pub local_stream_name: Option<String>,
    /// Publish under this name instead of the inbound name
    pub target_stream_name: Option<String>,
    pub emulate_user_agent: String,
}

impl TargetDescriptor {
    pub fn new(target_uri: TargetUri) -> Self {
        Self {
            target_uri,
            local_stream_name: None,
            target_stream_name: None,
            emulate_user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Name filter
    ///
    /// `cam1` matches `cam1` and `cam1?res=hd`, not `cam10`.
    pub fn matches_stream(&self, stream_name: &str) -> bool {
        match &self.local_stream_name {
            None => true,
            Some(filter) => {
                stream_name == filter
                    || stream_name
                        .strip_prefix(filter.as_str())
                        .map(|rest| rest.starts_with('?'))
                        .unwrap_or(false)
            }
        }
    }

    /// Name the stream gets on the target
    pub fn resolve_target_stream_name(&self, stream_name: &str) -> String {
        self.target_stream_name
            .clone()
            .unwrap_or_else(|| stream_name.to_string())
    }

    /// Self-contained parameter copy for one push
    pub fn forward_params(&self, target_name: &str, stream_name: &str) -> ForwardParams {
        ForwardParams {
            target_name: target_name.to_string(),
            target_uri: self.target_uri.clone(),
            local_stream_name: self.local_stream_name.clone(),
            target_stream_name: self.resolve_target_stream_name(stream_name),
            emulate_user_agent: self.emulate_user_agent.clone(),
        }
    }
}

/// Effective parameters of one forwarding attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardParams {
    /// Key of the target in the configuration
    pub target_name: String,
    pub target_uri: TargetUri,
    pub local_stream_name: Option<String>,
    /// Resolved remote stream name
    pub target_stream_name: String,
    pub emulate_user_agent: String,
}

/// Configured targets in document order
pub type TargetServerSet = IndexMap<String, TargetDescriptor>;

/// Validated application configuration
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    pub name: String,
    pub abort_on_connect_error: bool,
    pub target_servers: Arc<TargetServerSet>,
    pub outbound: OutboundConfig,
}

impl ApplicationConfig {
    /// Configuration with no targets
    pub fn new(name: impl Into<String>, abort_on_connect_error: bool) -> Self {
        Self {
            name: name.into(),
            abort_on_connect_error,
            target_servers: Arc::new(TargetServerSet::new()),
            outbound: OutboundConfig::default(),
        }
    }

    /// Replace the target set
    pub fn with_targets(mut self, targets: TargetServerSet) -> Self {
        self.target_servers = Arc::new(targets);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let root = value.as_object().ok_or_else(|| ConfigError::InvalidValue {
            key: "<root>".into(),
            value: kind_of(value).into(),
        })?;

        let name = optional_str(root, "name", "name")?
            .unwrap_or(DEFAULT_APP_NAME)
            .to_string();

        let abort_on_connect_error = match root.get("abortOnConnectError") {
            None => return Err(ConfigError::MissingKey("abortOnConnectError".into())),
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(invalid("abortOnConnectError", other)),
        };

        let servers = match root.get("targetServers") {
            None => return Err(ConfigError::MissingKey("targetServers".into())),
            Some(Value::Object(map)) => map,
            Some(other) => return Err(invalid("targetServers", other)),
        };

        let mut targets = TargetServerSet::with_capacity(servers.len());
        for (target, entry) in servers {
            let path = format!("targetServers.{}", target);
            let entry = entry.as_object().ok_or_else(|| invalid(&path, entry))?;
            targets.insert(target.clone(), parse_target(target, &path, entry)?);
        }

        let outbound = match root.get("outbound") {
            None => OutboundConfig::default(),
            Some(Value::Object(map)) => parse_outbound(map)?,
            Some(other) => return Err(invalid("outbound", other)),
        };

        Ok(Self {
            name,
            abort_on_connect_error,
            target_servers: Arc::new(targets),
            outbound,
        })
    }
}

fn parse_target(
    target: &str,
    path: &str,
    entry: &Map<String, Value>,
) -> Result<TargetDescriptor, ConfigError> {
    let uri_key = format!("{}.targetUri", path);
    let uri = optional_str(entry, "targetUri", &uri_key)?
        .ok_or_else(|| ConfigError::MissingKey(uri_key.clone()))?;

    let mut descriptor = TargetDescriptor::new(TargetUri::parse(target, uri)?);
    descriptor.local_stream_name = optional_name(entry, "localStreamName", path)?;
    descriptor.target_stream_name = optional_name(entry, "targetStreamName", path)?;
    if let Some(agent) = optional_name(entry, "emulateUserAgent", path)? {
        descriptor.emulate_user_agent = agent;
    }
    Ok(descriptor)
}

fn parse_outbound(map: &Map<String, Value>) -> Result<OutboundConfig, ConfigError> {
    let mut config = OutboundConfig::default();

    if let Some(value) = map.get("connectTimeoutMs") {
        let ms = value
            .as_u64()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| invalid("outbound.connectTimeoutMs", value))?;
        config = config.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(value) = map.get("chunkSize") {
        let size = value
            .as_u64()
            .filter(|s| (1..=u64::from(MAX_CHUNK_SIZE)).contains(s))
            .ok_or_else(|| invalid("outbound.chunkSize", value))?;
        config = config.chunk_size(size as u32);
    }
    if let Some(value) = map.get("reuseConnections") {
        let reuse = value
            .as_bool()
            .ok_or_else(|| invalid("outbound.reuseConnections", value))?;
        config = config.reuse_connections(reuse);
    }
    Ok(config)
}

fn optional_str<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<&'a str>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid(path, other)),
    }
}

/// Optional target string that must not be empty when present
fn optional_name(
    entry: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, ConfigError> {
    let key_path = format!("{}.{}", path, key);
    match optional_str(entry, key, &key_path)? {
        None => Ok(None),
        Some("") => Err(ConfigError::InvalidValue {
            key: key_path,
            value: "\"\"".into(),
        }),
        Some(s) => Ok(Some(s.to_string())),
    }
}

fn invalid(key: &str, value: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "abortOnConnectError": false,
        "targetServers": {
            "zeta": { "targetUri": "rtmp://backup.example.com/live" },
            "alpha": {
                "targetUri": "rtmp://10.0.0.5:1940/app/inst/?k=v",
                "localStreamName": "cam1",
                "targetStreamName": "backup",
                "emulateUserAgent": "FMLE/3.0"
            }
        },
        "outbound": { "connectTimeoutMs": 1500, "reuseConnections": false }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = ApplicationConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.name, DEFAULT_APP_NAME);
        assert!(!config.abort_on_connect_error);

        // Document order, not sorted
        let names: Vec<_> = config.target_servers.keys().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let zeta = &config.target_servers["zeta"];
        assert_eq!(zeta.target_uri.port, DEFAULT_RTMP_PORT);
        assert_eq!(zeta.target_uri.app, "live");
        assert_eq!(zeta.emulate_user_agent, DEFAULT_USER_AGENT);
        assert_eq!(zeta.local_stream_name, None);

        let alpha = &config.target_servers["alpha"];
        assert_eq!(alpha.target_uri.host, "10.0.0.5");
        assert_eq!(alpha.target_uri.port, 1940);
        assert_eq!(alpha.target_uri.app, "app/inst");
        assert_eq!(alpha.target_uri.query.as_deref(), Some("k=v"));
        assert_eq!(alpha.target_uri.tc_url(), "rtmp://10.0.0.5:1940/app/inst?k=v");
        assert_eq!(alpha.emulate_user_agent, "FMLE/3.0");

        assert_eq!(config.outbound.connect_timeout, Duration::from_millis(1500));
        assert!(!config.outbound.reuse_connections);
    }

    #[test]
    fn test_unsupported_scheme() {
        let json = r#"{ "abortOnConnectError": true,
            "targetServers": { "t": { "targetUri": "http://example.com/live" } } }"#;
        assert_eq!(
            ApplicationConfig::from_json_str(json).unwrap_err(),
            ConfigError::UnsupportedScheme {
                target: "t".into(),
                scheme: "http".into()
            }
        );
    }

    #[test]
    fn test_rtmp_family_schemes() {
        for scheme in ["rtmp", "rtmps", "rtmpt", "rtmpe", "rtmpte"] {
            let uri = TargetUri::parse("t", &format!("{}://h/live", scheme)).unwrap();
            assert_eq!(uri.scheme, scheme);
            assert_eq!(uri.host, "h");
            assert_eq!(uri.app, "live");
        }
        assert!(matches!(
            TargetUri::parse("t", "srt://h/live"),
            Err(ConfigError::UnsupportedScheme { scheme, .. }) if scheme == "srt"
        ));
    }

    #[test]
    fn test_missing_keys() {
        assert_eq!(
            ApplicationConfig::from_json_str(r#"{ "targetServers": {} }"#).unwrap_err(),
            ConfigError::MissingKey("abortOnConnectError".into())
        );
        assert_eq!(
            ApplicationConfig::from_json_str(r#"{ "abortOnConnectError": true }"#).unwrap_err(),
            ConfigError::MissingKey("targetServers".into())
        );
        let json = r#"{ "abortOnConnectError": true, "targetServers": { "t": {} } }"#;
        assert_eq!(
            ApplicationConfig::from_json_str(json).unwrap_err(),
            ConfigError::MissingKey("targetServers.t.targetUri".into())
        );
    }

    #[test]
    fn test_invalid_values() {
        let json = r#"{ "abortOnConnectError": "yes", "targetServers": {} }"#;
        assert!(matches!(
            ApplicationConfig::from_json_str(json),
            Err(ConfigError::InvalidValue { key, .. }) if key == "abortOnConnectError"
        ));

        let json = r#"{ "abortOnConnectError": true,
            "targetServers": { "t": { "targetUri": "rtmp://h/live", "localStreamName": 5 } } }"#;
        assert!(matches!(
            ApplicationConfig::from_json_str(json),
            Err(ConfigError::InvalidValue { key, .. }) if key == "targetServers.t.localStreamName"
        ));

        let json = r#"{ "abortOnConnectError": true, "targetServers": {},
            "outbound": { "chunkSize": 0 } }"#;
        assert!(matches!(
            ApplicationConfig::from_json_str(json),
            Err(ConfigError::InvalidValue { key, .. }) if key == "outbound.chunkSize"
        ));

        assert!(matches!(
            ApplicationConfig::from_json_str("[1, 2]"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ApplicationConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_or_null_names_are_rejected() {
        for key in ["localStreamName", "targetStreamName", "emulateUserAgent"] {
            for value in [r#""""#, "null"] {
                let json = format!(
                    r#"{{ "abortOnConnectError": true, "targetServers": {{
                        "t": {{ "targetUri": "rtmp://h/live", "{}": {} }} }} }}"#,
                    key, value
                );
                let err = ApplicationConfig::from_json_str(&json).unwrap_err();
                assert_eq!(
                    err,
                    ConfigError::InvalidValue {
                        key: format!("targetServers.t.{}", key),
                        value: value.into(),
                    }
                );
            }
        }
    }

    #[test]
    fn test_invalid_uri() {
        let json = r#"{ "abortOnConnectError": true,
            "targetServers": { "t": { "targetUri": "not a uri" } } }"#;
        assert!(matches!(
            ApplicationConfig::from_json_str(json),
            Err(ConfigError::InvalidUri { target, .. }) if target == "t"
        ));
    }

    #[test]
    fn test_name_filter() {
        let uri = TargetUri::parse("t", "rtmp://h/live").unwrap();
        let mut descriptor = TargetDescriptor::new(uri);
        assert!(descriptor.matches_stream("anything"));

        descriptor.local_stream_name = Some("cam1".into());
        assert!(descriptor.matches_stream("cam1"));
        assert!(descriptor.matches_stream("cam1?res=hd"));
        assert!(!descriptor.matches_stream("cam2"));
        assert!(!descriptor.matches_stream("cam10"));
    }

    #[test]
    fn test_target_name_resolution() {
        let uri = TargetUri::parse("t", "rtmp://h/live").unwrap();
        let mut descriptor = TargetDescriptor::new(uri);
        assert_eq!(descriptor.resolve_target_stream_name("live"), "live");

        descriptor.target_stream_name = Some("backup".into());
        assert_eq!(descriptor.resolve_target_stream_name("live"), "backup");
        assert_eq!(descriptor.resolve_target_stream_name("other"), "backup");

        let params = descriptor.forward_params("t", "live");
        assert_eq!(params.target_stream_name, "backup");
        assert_eq!(params.target_name, "t");
    }
}
