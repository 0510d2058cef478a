//! The reverse proxy.
//!
//! # Request Flow
//!
//! ```text
//! inbound request
//!        │ buffer body, rewrite scheme/authority
//!        ▼
//!   ForwardRequest ──► forward ──► Ok(response) ──► inject? ──► client
//!        ▲                │
//!        │ retry_delay    │ Err(transport)
//!        └── should_retry ┘
//!                         │ not retryable / cap reached
//!                         ▼
//!                   error_handler ──► client
//! ```
//!
//! Every stage is pluggable through [`ProxyBuilder`]; the defaults forward
//! with `reqwest`, retry only top-level navigations, inject only into HTML
//! navigations, and answer failures with `502 Bad Gateway`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::uri::{Authority, Scheme};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, header};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use futures_util::{StreamExt, stream};
use tracing::{debug, error, warn};

use dl_core::ServerConfig;

use crate::error::ProxyError;
use crate::forward::{default_client, reqwest_forwarder};
use crate::request::ForwardRequest;

/// Future returned by a [`Forward`] function.
pub type ForwardFuture = BoxFuture<'static, Result<Response<Body>, ProxyError>>;

/// Sends a request to the application and returns its response.
pub type Forward = Arc<dyn Fn(ForwardRequest) -> ForwardFuture + Send + Sync>;

/// Decides whether a failed request is attempted again.
pub type RetryPredicate = Arc<dyn Fn(&ForwardRequest) -> bool + Send + Sync>;

/// Decides whether the payload is appended, given the request and the
/// response headers.
pub type InjectPredicate = Arc<dyn Fn(&ForwardRequest, &HeaderMap) -> bool + Send + Sync>;

/// Builds the response sent when forwarding fails for good.
pub type ErrorHandler = Arc<dyn Fn(&ForwardRequest, ProxyError) -> Response<Body> + Send + Sync>;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A reverse proxy in front of the user's application.
///
/// Cloning is cheap; all pluggable parts are reference counted.
///
/// # Examples
///
/// ```no_run
/// use axum::Router;
/// use axum::extract::Request;
/// use dl_proxy::Proxy;
///
/// # fn demo() -> Result<(), dl_proxy::ProxyError> {
/// let proxy = Proxy::builder("http://localhost:8080")
///     .inject("<script>console.log('hi')</script>")
///     .build()?;
///
/// let app: Router = Router::new().fallback(move |req: Request| {
///     let proxy = proxy.clone();
///     async move { proxy.serve(req).await }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Proxy {
    scheme: Scheme,
    authority: Authority,
    forward: Forward,
    should_retry: RetryPredicate,
    retry_delay: Duration,
    max_retries: Option<u32>,
    should_inject: InjectPredicate,
    inject: Bytes,
    error_handler: ErrorHandler,
}

impl Proxy {
    /// Creates a proxy to `destination` with default behaviour.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidUrl`] if `destination` lacks a scheme or
    /// host, or [`ProxyError::Transport`] if the HTTP client cannot be built.
    pub fn new(destination: &str) -> Result<Self, ProxyError> {
        Self::builder(destination).build()
    }

    /// Starts building a proxy to `destination`.
    pub fn builder(destination: impl Into<String>) -> ProxyBuilder {
        ProxyBuilder::new(destination)
    }

    /// Starts building a proxy from a [`ServerConfig`].
    pub fn from_config(config: &ServerConfig) -> ProxyBuilder {
        Self::builder(config.forward_to_url.clone())
            .retry_delay(config.retry_delay())
            .max_retries(config.retry_limit())
    }

    /// Returns the destination as `scheme://authority`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }

    /// Forwards `req` and produces the response for the client.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let (parts, body) = req.into_parts();

        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => return bad_request(&ProxyError::Body(e)),
        };

        let req = match ForwardRequest::rewrite(parts, body, &self.scheme, &self.authority) {
            Ok(req) => req,
            Err(e) => return bad_request(&e),
        };

        match self.forward_with_retry(&req).await {
            Ok(response) => self.respond(&req, response),
            Err(err) => (self.error_handler)(&req, err),
        }
    }

    async fn forward_with_retry(&self, req: &ForwardRequest) -> Result<Response<Body>, ProxyError> {
        let mut retries = 0u32;
        loop {
            let err = match (self.forward)(req.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !(self.should_retry)(req) {
                return Err(err);
            }
            if self.max_retries.is_some_and(|max| retries >= max) {
                return Err(ProxyError::RetriesExhausted {
                    attempts: retries + 1,
                    source: Box::new(err),
                });
            }

            retries += 1;
            debug!(uri = %req.uri, retries, error = %err, "Application unreachable, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    fn respond(&self, req: &ForwardRequest, response: Response<Body>) -> Response<Body> {
        if self.inject.is_empty() || !(self.should_inject)(req, response.headers()) {
            return response;
        }

        let (mut parts, body) = response.into_parts();

        if let Some(length) = content_length(&parts.headers) {
            let extended = length.saturating_add(self.inject.len() as u64);
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(extended));
        }

        let payload = self.inject.clone();
        let body = body
            .into_data_stream()
            .chain(stream::once(async move { Ok::<_, axum::Error>(payload) }));

        Response::from_parts(parts, Body::from_stream(body))
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("destination", &self.destination())
            .field("retry_delay", &self.retry_delay)
            .field("max_retries", &self.max_retries)
            .field("inject_len", &self.inject.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Proxy`].
pub struct ProxyBuilder {
    destination: String,
    forward: Option<Forward>,
    should_retry: RetryPredicate,
    retry_delay: Duration,
    max_retries: Option<u32>,
    should_inject: InjectPredicate,
    inject: Bytes,
    error_handler: ErrorHandler,
}

impl ProxyBuilder {
    fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            forward: None,
            should_retry: Arc::new(ForwardRequest::is_navigation),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: None,
            should_inject: Arc::new(is_html_navigation),
            inject: Bytes::new(),
            error_handler: Arc::new(bad_gateway),
        }
    }

    /// Replaces the forwarding function.
    #[must_use]
    pub fn forward(mut self, forward: Forward) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Replaces the retry predicate.
    #[must_use]
    pub fn should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&ForwardRequest) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(f);
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Caps the number of retries after the first attempt; `None` retries
    /// for as long as the predicate allows.
    #[must_use]
    pub fn max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Replaces the injection predicate.
    #[must_use]
    pub fn should_inject<F>(mut self, f: F) -> Self
    where
        F: Fn(&ForwardRequest, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.should_inject = Arc::new(f);
        self
    }

    /// Sets the payload appended to injected responses.
    #[must_use]
    pub fn inject(mut self, payload: impl Into<Bytes>) -> Self {
        self.inject = payload.into();
        self
    }

    /// Replaces the handler for requests that could not be forwarded.
    #[must_use]
    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&ForwardRequest, ProxyError) -> Response<Body> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(f);
        self
    }

    /// Validates the destination and builds the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidUrl`] if the destination lacks a scheme
    /// or host, or [`ProxyError::Transport`] if the default HTTP client
    /// cannot be built.
    pub fn build(self) -> Result<Proxy, ProxyError> {
        let uri: Uri = self
            .destination
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| {
                ProxyError::invalid_url(&self.destination, e.to_string())
            })?;

        let parts = uri.into_parts();
        let scheme = parts
            .scheme
            .ok_or_else(|| ProxyError::invalid_url(&self.destination, "missing scheme"))?;
        let authority = parts
            .authority
            .ok_or_else(|| ProxyError::invalid_url(&self.destination, "missing host"))?;

        let forward = match self.forward {
            Some(forward) => forward,
            None => reqwest_forwarder(default_client()?),
        };

        Ok(Proxy {
            scheme,
            authority,
            forward,
            should_retry: self.should_retry,
            retry_delay: self.retry_delay,
            max_retries: self.max_retries,
            should_inject: self.should_inject,
            inject: self.inject,
            error_handler: self.error_handler,
        })
    }
}

/// Default injection predicate: an uncompressed HTML response to a
/// top-level navigation.
pub fn is_html_navigation(req: &ForwardRequest, headers: &HeaderMap) -> bool {
    req.is_navigation() && is_html(headers) && !is_encoded(headers)
}

/// Default error handler: logs and answers `502 Bad Gateway`.
///
/// Writing a response here departs from a log-only handler, which leaves
/// the browser waiting on a request that will never complete until its own
/// timeout fires. Pass a custom handler to [`ProxyBuilder::error_handler`]
/// for other behavior.
pub fn bad_gateway(req: &ForwardRequest, err: ProxyError) -> Response<Body> {
    error!(method = %req.method, uri = %req.uri, error = %err, "Proxy request failed");
    (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
}

fn bad_request(err: &ProxyError) -> Response<Body> {
    warn!(error = %err, "Rejected inbound request");
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/html"))
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
