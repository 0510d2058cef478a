//! The default forwarder, backed by `reqwest`.
//!
//! Redirects are never followed (the browser must see them) and bodies are
//! streamed in both directions. Hop-by-hop headers are connection-scoped
//! and are stripped on the way out and on the way back.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Response, header};
use futures_util::FutureExt;

use crate::error::ProxyError;
use crate::proxy::Forward;
use crate::request::ForwardRequest;

/// Headers that apply to a single connection, per RFC 9110 §7.6.1.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Builds the client used by [`reqwest_forwarder`].
///
/// # Errors
///
/// Returns [`ProxyError::Transport`] if the TLS backend cannot initialise.
pub fn default_client() -> Result<reqwest::Client, ProxyError> {
    Ok(reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// Returns a forwarder that sends requests with `client`.
pub fn reqwest_forwarder(client: reqwest::Client) -> Forward {
    Arc::new(move |req: ForwardRequest| {
        let client = client.clone();
        async move { send(&client, req).await }.boxed()
    })
}

async fn send(client: &reqwest::Client, req: ForwardRequest) -> Result<Response<Body>, ProxyError> {
    let mut headers = req.headers;
    strip_hop_by_hop(&mut headers);

    let upstream = client
        .request(req.method, req.uri.to_string())
        .headers(headers)
        .body(req.body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::builder()
        .status(status)
        .body(Body::from_stream(upstream.bytes_stream()))?;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Removes connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
