//! Error types for the dl-runtime crate.
//!
//! [`RuntimeError`] is the terminal error of a run. Every subsystem error
//! converts into it, so the first failure recorded by
//! [`Shutdown`](crate::Shutdown) can be returned as-is.

use std::io;
use std::net::SocketAddr;

use dl_core::ConfigError;
use dl_exec::ExecError;
use dl_proxy::ProxyError;
use dl_watcher::WatchError;

/// Errors raised by the dev server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: SocketAddr,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The server stopped accepting connections.
    #[error("dev server failed: {0}")]
    Serve(#[source] io::Error),

    /// The broadcaster task is no longer running.
    #[error("refresh broadcaster has stopped")]
    BroadcasterGone,
}

/// The error a run ends with.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The directory watcher failed.
    #[error("watcher: {0}")]
    Watch(#[from] WatchError),

    /// The supervised command could not be started or stopped.
    #[error("executor: {0}")]
    Exec(#[from] ExecError),

    /// The proxy could not be configured.
    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),

    /// The dev server failed.
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

impl RuntimeError {
    /// Returns `true` if the error happened before the run loop started.
    #[must_use]
    pub const fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Proxy(_) | Self::Server(ServerError::Bind { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message() {
        let err = ServerError::Bind {
            addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            err.to_string(),
            "failed to listen on 127.0.0.1:8081: address in use"
        );
        assert!(RuntimeError::from(err).is_startup());
    }

    #[test]
    fn test_runtime_error_wraps_subsystems() {
        let err = RuntimeError::from(ExecError::EmptyCommand);
        assert_eq!(err.to_string(), "executor: command is empty");
        assert!(!err.is_startup());

        let err = RuntimeError::from(WatchError::ChannelClosed);
        assert_eq!(err.to_string(), "watcher: event channel closed unexpectedly");
    }
}
