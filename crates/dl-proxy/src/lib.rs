//! Reverse proxy for the devloop dev server.
//!
//! The proxy forwards browser traffic to the user's application. While the
//! application restarts, top-level navigations are retried instead of
//! failing, and HTML pages get a live-reload script appended on the way
//! back.
//!
//! # Crate Layout
//!
//! - [`request`] - [`ForwardRequest`], the buffered, rewritten request
//! - [`forward`] - the default `reqwest` forwarder
//! - [`proxy`] - [`Proxy`], [`ProxyBuilder`] and the default predicates
//! - [`error`] - [`ProxyError`]

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod forward;
pub mod proxy;
pub mod request;

pub use error::{BoxError, ProxyError};
pub use forward::{default_client, reqwest_forwarder};
pub use proxy::{
    DEFAULT_RETRY_DELAY, ErrorHandler, Forward, ForwardFuture, InjectPredicate, Proxy,
    ProxyBuilder, RetryPredicate,
};
pub use request::ForwardRequest;
