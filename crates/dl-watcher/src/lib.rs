//! Recursive directory watcher with glob filtering and async event streaming.
//!
//! This crate keeps an explicit watch set over a source tree using the
//! `notify` crate, extends it as new subdirectories appear, filters events
//! against include/exclude glob rules, and streams the survivors to an
//! async consumer.
//!
//! # Overview
//!
//! The dl-watcher crate is designed to:
//!
//! - Walk the root once, registering every directory not pruned by an
//!   exclude-directory rule
//! - Watch newly created directories (and their subtrees) as they appear
//! - Drop events matching exclude-file rules, and events not matching any
//!   include-file rule when include rules are configured
//! - Apply backpressure: the loop waits for the consumer instead of buffering
//!
//! # Crate Dependencies
//!
//! ```text
//! dl-cli ──► dl-runtime ──► dl-watcher ──► dl-core
//!                       ├─► dl-exec
//!                       └─► dl-proxy
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use dl_watcher::{DirWatcher, GlobRules};
//! use dl_core::WatcherConfig;
//! use camino::Utf8Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules = GlobRules::from_config(&WatcherConfig::default())?;
//!     let mut watcher = DirWatcher::new(Utf8Path::new("."), rules)?;
//!     let mut events = watcher.events().expect("fresh watcher");
//!
//!     let cancel = CancellationToken::new();
//!     let task = tokio::spawn(watcher.start(cancel.clone()));
//!
//!     if let Some(event) = events.recv().await {
//!         println!("changed: {event}");
//!     }
//!
//!     cancel.cancel();
//!     task.await??;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Construction errors (missing root, malformed glob, enumeration failure)
//! are returned by [`DirWatcher::new`] / [`GlobRules::new`]. Once running,
//! any backend error ends [`DirWatcher::start`] with a [`WatchError`].

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod filter;
pub mod watcher;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{Op, WatchEvent};

// Re-export filter types
pub use filter::{AcceptAllFilter, FileFilter, GlobRules};

// Re-export watcher types
pub use watcher::DirWatcher;
