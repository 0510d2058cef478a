//! Core configuration and errors for devloop.
//!
//! This crate provides the plain configuration value consumed by the rest of
//! the workspace:
//!
//! - [`Config`] and its nested sections ([`ExecConfig`], [`WatcherConfig`],
//!   [`ServerConfig`])
//! - Loading from and scaffolding of the `.devloop.toml` file
//! - [`ConfigError`] for everything that can go wrong before the run loop starts

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{CONFIG_FILE_NAME, Config, ExecConfig, ServerConfig, WatcherConfig};
pub use error::ConfigError;
