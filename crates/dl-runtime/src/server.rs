//! The dev HTTP server.
//!
//! One listener, two routes:
//!
//! | Route              | Handler                                          |
//! |--------------------|--------------------------------------------------|
//! | `GET /__dev-server__` | Server-sent events, one `refresh` per broadcast |
//! | anything else      | [`Proxy`] to the application                      |
//!
//! Proxied HTML navigations carry [`RELOAD_SCRIPT`], which connects back to
//! the event route and reloads the page on any message.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dl_proxy::Proxy;

use crate::broadcast::{Broadcaster, Subscriber};
use crate::error::ServerError;

/// Path of the server-sent events route.
pub const DEV_SERVER_PATH: &str = "/__dev-server__";

/// Script appended to proxied HTML navigations.
pub const RELOAD_SCRIPT: &str = r#"
<script>
  (() => {
    const source = new EventSource("/__dev-server__");
    window.addEventListener("beforeunload", () => source.close());
    source.onmessage = () => window.location.reload();
  })();
</script>"#;

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Frames queued per connection before further refreshes are dropped.
const CONNECTION_BUFFER: usize = 4;

#[derive(Clone)]
struct ServerState {
    broadcaster: Broadcaster,
    proxy: Proxy,
    cancel: CancellationToken,
}

/// Builds the dev server router.
///
/// In-flight proxy requests and open event streams end when `cancel` fires,
/// so a graceful shutdown does not wait on them.
pub fn router(broadcaster: Broadcaster, proxy: Proxy, cancel: CancellationToken) -> Router {
    Router::new()
        .route(DEV_SERVER_PATH, get(events))
        .fallback(forward)
        .with_state(ServerState {
            broadcaster,
            proxy,
            cancel,
        })
}

/// Binds the dev server listener.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is unavailable.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves `router` on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the accept loop fails.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Dev server listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(ServerError::Serve)?;

    debug!("Dev server stopped");
    Ok(())
}

async fn events(
    State(state): State<ServerState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (tx, rx) = mpsc::channel::<()>(CONNECTION_BUFFER);

    // The receiver lives as long as the response body; once the client is
    // gone the send fails and the broadcaster drops this subscriber.
    let subscriber: Subscriber = Box::new(move || match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => true,
        Err(TrySendError::Closed(())) => false,
    });

    state
        .broadcaster
        .register(subscriber)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    debug!("Browser subscribed to refresh events");

    let stream = ReceiverStream::new(rx)
        .map(|()| Ok(Event::default().data("refresh")))
        .take_until(state.cancel.cancelled_owned());

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}

async fn forward(State(state): State<ServerState>, req: Request) -> Response {
    tokio::select! {
        response = state.proxy.serve(req) => response,
        () = state.cancel.cancelled() => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
