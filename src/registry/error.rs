//! Registry error types

use std::fmt;

/// Error type for stream registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No stream with this id
    StreamNotFound(u32),
    /// A live stream with this name is already publishing in the application
    NameInUse { app: String, name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::StreamNotFound(id) => write!(f, "Stream not found: {}", id),
            RegistryError::NameInUse { app, name } => {
                write!(f, "Stream name already in use: {}/{}", app, name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
