//! Error types for the dl-exec crate.

use std::io;

/// Errors that can occur while supervising the child process.
///
/// # Error Recovery Strategy
///
/// - **Spawn errors** ([`ExecError::Spawn`]): Fatal at startup, reported on restart
/// - **Signal errors** ([`ExecError::Signal`]): Logged - the group may already be gone
/// - **Cancelled** ([`ExecError::Cancelled`]): Expected during shutdown
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The command line is empty.
    #[error("command is empty")]
    EmptyCommand,

    /// The program could not be started.
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The OS did not report a process id for a freshly spawned child.
    #[error("spawned process has no pid")]
    MissingPid,

    /// A signal could not be delivered to the process group.
    #[error("failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        /// Name of the signal (`SIGINT`, `SIGKILL`, or the platform equivalent).
        signal: &'static str,
        /// The process group id.
        pgid: u32,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The caller's context was cancelled before the operation finished.
    #[error("operation cancelled")]
    Cancelled,
}

impl ExecError {
    /// Creates a new [`ExecError::Spawn`] error.
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Creates a new [`ExecError::Signal`] error.
    pub fn signal(signal: &'static str, pgid: u32, source: impl Into<io::Error>) -> Self {
        Self::Signal {
            signal,
            pgid,
            source: source.into(),
        }
    }

    /// Returns `true` if this error only reflects a cancelled context.
    #[inline]
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_spawn() {
        let err = ExecError::spawn(
            "no-such-binary",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            r#"failed to spawn "no-such-binary": not found"#
        );
    }

    #[test]
    fn test_exec_error_signal() {
        let err = ExecError::signal(
            "SIGKILL",
            4242,
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "failed to send SIGKILL to process group 4242: denied"
        );
    }

    #[test]
    fn test_exec_error_cancelled() {
        assert!(ExecError::Cancelled.is_cancelled());
        assert_eq!(ExecError::EmptyCommand.to_string(), "command is empty");
    }
}
