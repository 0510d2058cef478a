//! Error types for the dl-proxy crate.

/// Boxed error returned by pluggable forwarders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while forwarding a request.
///
/// # Error Recovery Strategy
///
/// - **Invalid URL** ([`ProxyError::InvalidUrl`]): Fatal - detected at construction
/// - **Transport** ([`ProxyError::Transport`]): Retried for navigations, else reported
/// - **Retries exhausted** ([`ProxyError::RetriesExhausted`]): Reported to the error handler
/// - **Body / HTTP** ([`ProxyError::Body`], [`ProxyError::Http`]): Reported to the error handler
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The destination URL is malformed or lacks a scheme or host.
    #[error("invalid forward URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The application could not be reached.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// Every allowed attempt failed.
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: Box<ProxyError>,
    },

    /// The inbound request body could not be read.
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    /// A request or response could not be assembled.
    #[error("invalid HTTP message: {0}")]
    Http(#[from] axum::http::Error),
}

impl ProxyError {
    /// Creates a new [`ProxyError::InvalidUrl`] error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new [`ProxyError::Transport`] error.
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Self::Transport(source.into())
    }

    /// Returns `true` if the application could not be reached.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RetriesExhausted { .. }
        )
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err)
    }
}
