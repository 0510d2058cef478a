//! Configuration structures for devloop.
//!
//! This module provides configuration types for all components of the application:
//!
//! - [`ExecConfig`] - The supervised command and its termination policy
//! - [`WatcherConfig`] - Glob filtering rules and the debounce window
//! - [`ServerConfig`] - Dev server port, forward URL and proxy retry policy
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`]; the defaults target a Go
//! web application listening on `localhost:8080`.
//!
//! The on-disk form is TOML, stored as [`CONFIG_FILE_NAME`] in the working
//! directory. A missing file simply yields the defaults.

use std::fs;
use std::io::{ErrorKind, Write};
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".devloop.toml";

/// Configuration for the supervised command.
///
/// # Examples
///
/// ```
/// use dl_core::ExecConfig;
///
/// let config = ExecConfig::default();
/// assert_eq!(config.cmd, vec!["go", "run", "."]);
/// assert_eq!(config.kill_delay_ms, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Argv of the command to supervise. The first element is the program.
    pub cmd: Vec<String>,

    /// Time in milliseconds between the graceful interrupt and the forced
    /// kill of the process group.
    pub kill_delay_ms: u64,
}

impl ExecConfig {
    /// Returns the kill delay as a [`Duration`].
    #[must_use]
    pub const fn kill_delay(&self) -> Duration {
        Duration::from_millis(self.kill_delay_ms)
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            cmd: vec!["go".to_owned(), "run".to_owned(), ".".to_owned()],
            kill_delay_ms: 5000,
        }
    }
}

/// Configuration for the directory watcher.
///
/// File rules (`exclude_file`, `include_file`) are matched against the base
/// name of the changed path. Directory rules (`exclude_dirs`) are matched
/// against the path relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Base-name globs whose events are always dropped.
    pub exclude_file: Vec<String>,

    /// Root-relative globs for directories that are never watched.
    pub exclude_dirs: Vec<String>,

    /// Base-name globs; when non-empty only matching events are kept.
    pub include_file: Vec<String>,

    /// Debounce window in milliseconds.
    ///
    /// The first event of a burst restarts immediately; the rest of the burst
    /// inside this window collapses into one trailing restart.
    pub debounce_ms: u64,
}

impl WatcherConfig {
    /// Returns the debounce window as a [`Duration`].
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            exclude_file: vec![
                "*_test.go".to_owned(),
                "*_templ.go".to_owned(),
                CONFIG_FILE_NAME.to_owned(),
            ],
            exclude_dirs: vec![".git".to_owned()],
            include_file: Vec::new(),
            debounce_ms: 100,
        }
    }
}

/// Configuration for the dev server and its reverse proxy.
///
/// # Examples
///
/// ```
/// use dl_core::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.port, 8081);
/// assert_eq!(config.forward_to_url, "http://localhost:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the dev server listens on.
    pub port: u16,

    /// Base URL of the user's application.
    pub forward_to_url: String,

    /// Fixed delay in milliseconds between proxy retries.
    pub retry_delay_ms: u64,

    /// Maximum number of proxy retries for a navigation request.
    ///
    /// `0` retries until the client goes away.
    pub max_retries: u32,
}

impl ServerConfig {
    /// Returns the retry delay as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the retry cap, or `None` when retries are unbounded.
    #[must_use]
    pub const fn retry_limit(&self) -> Option<u32> {
        if self.max_retries == 0 {
            None
        } else {
            Some(self.max_retries)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            forward_to_url: "http://localhost:8080".to_owned(),
            retry_delay_ms: 50,
            max_retries: 600,
        }
    }
}

/// Root configuration for devloop.
///
/// Combines all component configurations into a single value that is either
/// loaded from [`CONFIG_FILE_NAME`] or constructed programmatically, then
/// overridden by command-line flags.
///
/// # Examples
///
/// ```
/// use dl_core::Config;
///
/// let config: Config = toml::from_str("debug = true\n[server]\nport = 9000\n").unwrap();
/// assert!(config.debug);
/// assert_eq!(config.server.port, 9000);
/// // Unset fields keep their defaults
/// assert_eq!(config.server.forward_to_url, "http://localhost:8080");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Verbose watch-event logging.
    pub debug: bool,

    /// Supervised command configuration.
    pub exec: ExecConfig,

    /// Directory watcher configuration.
    pub watcher: WatcherConfig,

    /// Dev server configuration.
    pub server: ServerConfig,
}

impl Config {
    /// Loads the configuration from `path`, layered over the defaults.
    ///
    /// A missing file is not an error and yields [`Config::default`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read and
    /// [`ConfigError::Parse`] if it is not valid TOML for this structure.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Writes the default configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyExists`] if a file is already present at
    /// `path`, or an I/O / encoding error if writing fails.
    pub fn init(path: &Utf8Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string_pretty(&Self::default())?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ConfigError::AlreadyExists(path.to_owned()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty command, or for a
    /// forward URL that is not an `http(s)://host` URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.exec.cmd.first() {
            None => {
                return Err(ConfigError::invalid_option(
                    "exec.cmd",
                    "must contain at least the program name",
                ));
            }
            Some(program) if program.trim().is_empty() => {
                return Err(ConfigError::invalid_option(
                    "exec.cmd",
                    "program name must not be blank",
                ));
            }
            Some(_) => {}
        }

        let url = self.server.forward_to_url.trim();
        if url.is_empty() {
            return Err(ConfigError::invalid_option(
                "server.forward_to_url",
                "must not be empty",
            ));
        }

        let host = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .ok_or_else(|| {
                ConfigError::invalid_option("server.forward_to_url", "scheme must be http or https")
            })?;
        if host.split('/').next().is_none_or(str::is_empty) {
            return Err(ConfigError::invalid_option(
                "server.forward_to_url",
                "must include a host",
            ));
        }

        Ok(())
    }
}
