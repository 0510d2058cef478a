//! Error types for the dl-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related errors
//! that can occur before the run loop starts.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading, validation and scaffolding.
///
/// Every variant is fatal: configuration problems abort startup and the
/// binary exits with status 1.
///
/// # Examples
///
/// ```
/// use dl_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::AlreadyExists(Utf8PathBuf::from(".devloop.toml"));
/// assert!(error.to_string().contains(".devloop.toml"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The dotted name of the invalid option (e.g. `exec.cmd`).
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// The scaffold target already exists.
    #[error("{0} already exists")]
    AlreadyExists(Utf8PathBuf),

    /// An I/O error occurred while reading or writing the configuration file.
    #[error("failed to access configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to encode the default configuration.
    #[error("failed to encode configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[must_use]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}
