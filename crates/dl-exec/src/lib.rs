//! Process-group supervision for devloop.
//!
//! This crate runs the user's command as the leader of its own process
//! group and restarts it on demand. Stopping is graceful first: the group
//! receives an interrupt and is only killed if the leader has not exited
//! after a configurable delay.
//!
//! # Example
//!
//! ```no_run
//! use dl_exec::Executor;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), dl_exec::ExecError> {
//! let ctx = CancellationToken::new();
//! let mut exec = Executor::new(["go", "run", "."])?;
//! exec.start(&ctx)?;
//!
//! // Something changed on disk
//! exec.restart(&ctx).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod group;

pub use error::ExecError;
pub use executor::{ExecState, Executor};
pub use group::ProcessGroup;
