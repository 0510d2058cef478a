//! Coordinated shutdown state.
//!
//! A [`Shutdown`] owns the token every subsystem listens to, the slot for
//! the first fatal error, and the tracker used to join supervised tasks.
//!
//! ```text
//!  supervise("watcher", fut) ──► Err(e) ──► record(e) ──► token.cancel()
//!  supervise("server",  fut) ──► Err(e) ──► record(e)     (slot already set,
//!                                                          error dropped)
//! ```

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::error::RuntimeError;

/// Shared cancellation, first-error-wins slot and task join set.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    error: Arc<Mutex<Option<RuntimeError>>>,
    tracker: TaskTracker,
}

impl Shutdown {
    /// Creates shutdown state whose token is a child of `parent`.
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            error: Arc::new(Mutex::new(None)),
            tracker: TaskTracker::new(),
        }
    }

    /// Returns the shared cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` once shutdown has started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Starts shutdown without recording an error.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Records `err` if no error has been recorded yet, then starts shutdown.
    ///
    /// Returns `true` if `err` became the terminal error.
    pub fn record(&self, err: RuntimeError) -> bool {
        let recorded = {
            let mut slot = self.error.lock();
            if slot.is_none() {
                error!(error = %err, "Fatal error, shutting down");
                *slot = Some(err);
                true
            } else {
                debug!(error = %err, "Error after shutdown started");
                false
            }
        };
        self.token.cancel();
        recorded
    }

    /// Runs `fut` as a tracked task, recording its error if it fails.
    pub fn supervise<F, E>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<RuntimeError> + Send + 'static,
    {
        let shutdown = self.clone();
        self.tracker.spawn(async move {
            debug!(task = name, "Started");
            match fut.await {
                Ok(()) => debug!(task = name, "Finished"),
                Err(e) => {
                    shutdown.record(e.into());
                }
            }
        });
    }

    /// Waits for every supervised task to finish.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Takes the recorded error, if any.
    pub fn take_error(&self) -> Option<RuntimeError> {
        self.error.lock().take()
    }
}
