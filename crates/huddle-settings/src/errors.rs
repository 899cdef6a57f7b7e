//! Why a relay configuration could not be loaded.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while building [`HuddleSettings`](crate::HuddleSettings) from the
/// settings file and environment.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON, or a field has the wrong type.
    #[error("settings file {} is malformed: {source}", path.display())]
    Parse {
        /// File the bad JSON came from.
        path: PathBuf,
        /// Parser or type error.
        source: serde_json::Error,
    },
    /// A setting parsed but the relay cannot run with it.
    #[error("setting {field} {reason}")]
    Invalid {
        /// Dotted camelCase name, as written in the settings file.
        field: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

impl SettingsError {
    /// Name of the offending field, for [`SettingsError::Invalid`].
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Read { .. } | Self::Parse { .. } => None,
        }
    }
}

/// Result of loading or validating settings.
pub type Result<T> = std::result::Result<T, SettingsError>;
