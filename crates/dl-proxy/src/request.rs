//! The outbound form of a proxied request.

use axum::body::Bytes;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, HeaderValue, Method, Uri, header, request};

use crate::error::ProxyError;

/// Value of `Sec-Fetch-Dest` sent by browsers for top-level navigations.
const DOCUMENT: &str = "document";

/// A buffered request addressed to the application.
///
/// The body is held in memory so the request can be replayed on retry.
/// Method, path, query and headers are carried over from the inbound
/// request unchanged; only the scheme and authority are rewritten.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URI pointing at the application.
    pub uri: Uri,
    /// Inbound headers, including `Host`.
    pub headers: HeaderMap,
    /// Buffered request body.
    pub body: Bytes,
}

impl ForwardRequest {
    /// Rewrites an inbound request onto `scheme://authority`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Http`] if the rewritten URI is invalid.
    pub fn rewrite(
        parts: request::Parts,
        body: Bytes,
        scheme: &Scheme,
        authority: &Authority,
    ) -> Result<Self, ProxyError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        let uri = Uri::builder()
            .scheme(scheme.clone())
            .authority(authority.clone())
            .path_and_query(path_and_query)
            .build()?;

        Ok(Self {
            method: parts.method,
            uri,
            headers: parts.headers,
            body,
        })
    }

    /// Returns `true` if the browser marked this as a top-level document load.
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.headers
            .get("sec-fetch-dest")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(DOCUMENT.as_bytes()))
    }

    /// Returns the `Host` header the client sent, if any.
    #[must_use]
    pub fn host(&self) -> Option<&HeaderValue> {
        self.headers.get(header::HOST)
    }
}
