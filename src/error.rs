//! Error types
//!
//! Each layer has its own error enum; [`Error`] wraps them so that fallible
//! entry points can use `?` across layers.

use std::fmt;
use std::io;

pub use crate::registry::RegistryError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error on a socket or file
    Io(io::Error),
    /// Handshake failed
    Handshake(HandshakeError),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF decoding failed
    Amf(AmfError),
    /// Invalid application configuration
    Config(ConfigError),
    /// Atom (box) parsing failed
    Atom(AtomError),
    /// Protocol handler registration failed
    Handler(HandlerError),
    /// Stream registry operation failed
    Registry(RegistryError),
    /// Operation timed out
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Atom(e) => write!(f, "Atom error: {}", e),
            Error::Handler(e) => write!(f, "Handler error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Atom(e) => Some(e),
            Error::Handler(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Timeout => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<AtomError> for Error {
    fn from(e: AtomError) -> Self {
        Error::Atom(e)
    }
}

impl From<HandlerError> for Error {
    fn from(e: HandlerError) -> Self {
        Error::Handler(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Handshake errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Peer sent an unsupported RTMP version
    InvalidVersion(u8),
    /// Connection closed mid-handshake
    ConnectionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "invalid RTMP version {}", v),
            HandshakeError::ConnectionClosed => write!(f, "connection closed during handshake"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// RTMP protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Continuation chunk for a chunk stream with no previous header
    UnknownChunkStream(u32),
    /// Message larger than we are willing to buffer
    MessageTooLarge(u32),
    /// Peer sent a chunk size outside the valid range
    InvalidChunkSize(u32),
    /// Command message was malformed
    InvalidCommand(String),
    /// Message arrived in a state where it makes no sense
    UnexpectedMessage(String),
    /// Peer rejected a command
    Rejected(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownChunkStream(csid) => {
                write!(f, "continuation chunk on unknown chunk stream {}", csid)
            }
            ProtocolError::MessageTooLarge(len) => write!(f, "message too large: {} bytes", len),
            ProtocolError::InvalidChunkSize(size) => write!(f, "invalid chunk size {}", size),
            ProtocolError::InvalidCommand(msg) => write!(f, "invalid command: {}", msg),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "unexpected message: {}", msg),
            ProtocolError::Rejected(msg) => write!(f, "rejected by peer: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    /// Ran out of bytes mid-value
    UnexpectedEof,
    /// Type marker we do not understand
    UnknownMarker(u8),
    /// String was not valid UTF-8
    InvalidUtf8,
    /// Object end marker missing or wrong
    InvalidObjectEnd,
    /// Objects nested deeper than the decoder allows
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of data"),
            AmfError::UnknownMarker(m) => write!(f, "unknown type marker 0x{:02x}", m),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            AmfError::InvalidObjectEnd => write!(f, "invalid object end marker"),
            AmfError::NestingTooDeep => write!(f, "nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Application configuration errors
///
/// Every variant names the offending key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Document was not valid JSON
    Parse(String),
    /// Required key absent
    MissingKey(String),
    /// Key present with the wrong type or value
    InvalidValue { key: String, value: String },
    /// Target URI could not be parsed
    InvalidUri { target: String, uri: String },
    /// Target URI scheme has no outbound support
    UnsupportedScheme { target: String, scheme: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "invalid configuration document: {}", msg),
            ConfigError::MissingKey(key) => write!(f, "missing required key `{}`", key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for `{}`: {}", key, value)
            }
            ConfigError::InvalidUri { target, uri } => {
                write!(f, "target `{}` has an invalid uri: {}", target, uri)
            }
            ConfigError::UnsupportedScheme { target, scheme } => write!(
                f,
                "target `{}` uses scheme `{}`; only rtmp family targets are supported",
                target, scheme
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Atom (box) parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomError {
    /// Fewer bytes available than the structure requires
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },
    /// Declared size cannot even hold the atom's fixed header fields
    SizeTooSmall {
        kind: String,
        offset: u64,
        declared: u64,
        minimum: u64,
    },
    /// Child atom extends past the end of its parent
    ChildOverrun {
        parent: String,
        child: String,
        offset: u64,
    },
    /// Declared size does not fit in addressable memory
    SizeOverflow { offset: u64, declared: u64 },
    /// Containers nested deeper than the reader follows
    TooDeep { offset: u64 },
}

impl fmt::Display for AtomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "truncated at offset {}: needed {} bytes, {} available",
                offset, needed, available
            ),
            AtomError::SizeTooSmall {
                kind,
                offset,
                declared,
                minimum,
            } => write!(
                f,
                "atom `{}` at offset {} declares {} bytes, minimum is {}",
                kind, offset, declared, minimum
            ),
            AtomError::ChildOverrun {
                parent,
                child,
                offset,
            } => write!(
                f,
                "child `{}` at offset {} overruns parent `{}`",
                child, offset, parent
            ),
            AtomError::SizeOverflow { offset, declared } => {
                write!(f, "atom at offset {} declares unusable size {}", offset, declared)
            }
            AtomError::TooDeep { offset } => {
                write!(f, "atom at offset {} is nested too deeply", offset)
            }
        }
    }
}

impl std::error::Error for AtomError {}

/// Protocol handler registration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Another handler already owns this protocol tag
    AlreadyRegistered(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::AlreadyRegistered(tag) => {
                write!(f, "a handler is already registered for {}", tag)
            }
        }
    }
}

impl std::error::Error for HandlerError {}
