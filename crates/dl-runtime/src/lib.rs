//! Orchestration for devloop.
//!
//! This crate wires the directory watcher, the process executor and the
//! dev server into one loop, and owns the shutdown protocol that ties them
//! together.
//!
//! # Overview
//!
//! - [`debounce`] collapses bursts of file events into at most a leading
//!   and a trailing restart
//! - [`Broadcaster`] fans refresh notifications out to connected browsers
//!   from a single actor task
//! - [`server`] hosts the event stream route and the reverse proxy
//! - [`Shutdown`] holds the shared cancellation token, the first fatal
//!   error and the set of supervised tasks
//! - [`Runtime`] runs all of the above
//!
//! # Crate Dependencies
//!
//! ```text
//! dl-cli ──► dl-runtime ──► dl-watcher ──► dl-core
//!                       ├─► dl-exec ─────► dl-core
//!                       └─► dl-proxy ────► dl-core
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod debounce;
pub mod error;
pub mod runtime;
pub mod server;
pub mod shutdown;

pub use broadcast::{Broadcaster, Subscriber};
pub use debounce::debounce;
pub use error::{RuntimeError, ServerError};
pub use runtime::Runtime;
pub use server::{DEV_SERVER_PATH, RELOAD_SCRIPT};
pub use shutdown::Shutdown;
