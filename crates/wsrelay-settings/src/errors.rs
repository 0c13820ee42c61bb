//! Why a settings file could not become a [`RelaySettings`](crate::RelaySettings).

use std::path::PathBuf;

use thiserror::Error;

/// Settings loading failure.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not JSON, or a key has the wrong shape.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A key parsed but its value cannot be used.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted camelCase path, as written in the file.
        field: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

impl SettingsError {
    /// The offending key for [`SettingsError::Invalid`].
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
