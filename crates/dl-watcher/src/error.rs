//! Error types for the dl-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while building the watch set or running the watch loop.

use camino::Utf8PathBuf;

/// Errors that can occur during directory watching.
///
/// These errors cover watcher initialization failures, glob validation,
/// directory enumeration, and backend failures reported by the OS.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal - includes watch-limit exhaustion
/// - **Path not found** ([`WatchError::PathNotFound`]): Fatal - the root must exist
/// - **Pattern errors** ([`WatchError::Pattern`]): Fatal - detected at construction
/// - **Channel closed** ([`WatchError::ChannelClosed`]): Fatal - backend went away
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - skip and continue
/// - **I/O errors** ([`WatchError::Io`]): Fatal - e.g. permission denied while walking
///
/// # Examples
///
/// ```
/// use dl_watcher::WatchError;
///
/// fn handle_error(err: &WatchError) {
///     if err.is_fatal() {
///         eprintln!("watcher stopped: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    ///
    /// Covers OS-level failures such as exceeding the inotify watch limit.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The specified root path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// A glob rule is malformed or has the wrong shape for its rule kind.
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Why the pattern was rejected.
        reason: String,
    },

    /// The raw event channel from the notify backend was closed unexpectedly.
    #[error("event channel closed unexpectedly")]
    ChannelClosed,

    /// A path is not valid UTF-8.
    ///
    /// Events carrying such paths are logged and skipped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while enumerating or inspecting the tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::Pattern`] error.
    pub fn pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) => Some(path),
            Self::Notify(_)
            | Self::Pattern { .. }
            | Self::ChannelClosed
            | Self::NonUtf8Path(_)
            | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_watch_error_path_not_found() {
        let err = WatchError::path_not_found("src/missing");
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("src/missing"));
        assert_eq!(err.to_string(), "path does not exist: src/missing");
    }

    #[test]
    fn test_watch_error_pattern() {
        let err = WatchError::pattern("[a-", "unclosed character class");
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        insta::assert_snapshot!(err.to_string(), @r#"invalid pattern "[a-": unclosed character class"#);
    }

    #[test]
    fn test_watch_error_non_utf8() {
        let err = WatchError::NonUtf8Path(PathBuf::from("test"));
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_watch_error_io() {
        let err = WatchError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "access denied",
        ));
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("I/O error"));
    }
}
