//! Refresh fan-out to connected browsers.
//!
//! The subscriber list is owned by a single actor task. Registration and
//! broadcast requests arrive over two channels and are handled one at a
//! time, so the list is never shared.
//!
//! ```text
//!  SSE handler ── register(sub) ──► ┌───────────┐
//!                                   │   actor   │ ── sub() ──► live? keep : drop
//!  run loop ──── broadcast() ─────► └───────────┘
//!            ◄── delivered count ──────┘
//! ```

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ServerError;

/// Delivers one notification and reports whether the connection is alive.
pub type Subscriber = Box<dyn FnMut() -> bool + Send>;

/// Handle to the broadcaster actor.
///
/// Cloning yields another handle to the same actor.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    register_tx: mpsc::Sender<Subscriber>,
    broadcast_tx: mpsc::Sender<oneshot::Sender<usize>>,
}

impl Broadcaster {
    /// Spawns the actor. It stops when `cancel` fires or every handle is
    /// dropped, releasing all subscribers.
    #[must_use]
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
        tokio::spawn(run(register_rx, broadcast_rx, cancel));
        Self {
            register_tx,
            broadcast_tx,
        }
    }

    /// Adds a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BroadcasterGone`] if the actor has stopped.
    pub async fn register(&self, subscriber: Subscriber) -> Result<(), ServerError> {
        self.register_tx
            .send(subscriber)
            .await
            .map_err(|_| ServerError::BroadcasterGone)
    }

    /// Notifies every subscriber once and prunes the dead ones.
    ///
    /// Returns the number of subscribers still alive after delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BroadcasterGone`] if the actor has stopped.
    pub async fn broadcast(&self) -> Result<usize, ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.broadcast_tx
            .send(reply_tx)
            .await
            .map_err(|_| ServerError::BroadcasterGone)?;
        reply_rx.await.map_err(|_| ServerError::BroadcasterGone)
    }
}

async fn run(
    mut register_rx: mpsc::Receiver<Subscriber>,
    mut broadcast_rx: mpsc::Receiver<oneshot::Sender<usize>>,
    cancel: CancellationToken,
) {
    let mut subscribers: Vec<Subscriber> = Vec::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(subscriber) = register_rx.recv() => {
                subscribers.push(subscriber);
                trace!(subscribers = subscribers.len(), "Subscriber registered");
            }
            Some(reply) = broadcast_rx.recv() => {
                let before = subscribers.len();
                subscribers.retain_mut(|deliver| deliver());
                trace!(pruned = before - subscribers.len(), "Broadcast delivered");
                let _ = reply.send(subscribers.len());
            }
            else => break,
        }
    }

    debug!(subscribers = subscribers.len(), "Broadcaster stopped");
}
