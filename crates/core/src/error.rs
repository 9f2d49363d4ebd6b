//! Error types for droid-target
//!
//! Configuration and I/O failures shared by every crate in the workspace.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path:?}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Io { path, .. } => format!("Could not read config file {}", path.display()),
            ConfigError::TomlParse { path, source } => {
                format!("Config file {} is malformed: {}", path.display(), source.message())
            }
            _ => self.to_string(),
        }
    }
}
