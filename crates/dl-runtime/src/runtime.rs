//! The orchestrator.
//!
//! # Architecture
//!
//! ```text
//!  DirWatcher ──► debounce ──► run loop ──► Executor::restart
//!  (supervised)                   │
//!                                 └──────► Broadcaster::broadcast ──► SSE clients
//!
//!  dev server (supervised): /__dev-server__ ──► Broadcaster::register
//!                           everything else ──► Proxy ──► application
//! ```
//!
//! # Shutdown
//!
//! Every subsystem watches the token owned by [`Shutdown`]. When it fires,
//! either from the caller or from a recorded failure, the run loop waits
//! for the supervised process group to exit, then for the watcher and the
//! server, and finally returns the first recorded error.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use camino::Utf8Path;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dl_core::Config;
use dl_exec::Executor;
use dl_proxy::Proxy;
use dl_watcher::{DirWatcher, GlobRules, WatchError};

use crate::broadcast::Broadcaster;
use crate::debounce::debounce;
use crate::error::{RuntimeError, ServerError};
use crate::server::{self, RELOAD_SCRIPT};
use crate::shutdown::Shutdown;

/// A fully initialised dev loop, ready to run.
///
/// Construction performs every fallible startup step (configuration
/// validation, glob compilation, the initial watch walk and the listener
/// bind), so [`Runtime::run`] only fails on errors raised while running.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use dl_core::Config;
/// use dl_runtime::Runtime;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> Result<(), dl_runtime::RuntimeError> {
/// let runtime = Runtime::new(Utf8Path::new("."), Config::default()).await?;
/// let cancel = CancellationToken::new();
/// runtime.run(cancel).await
/// # }
/// ```
#[derive(Debug)]
pub struct Runtime {
    watcher: DirWatcher<GlobRules>,
    executor: Executor,
    proxy: Proxy,
    listener: TcpListener,
    local_addr: SocketAddr,
    debounce: Duration,
}

impl Runtime {
    /// Validates `config` and prepares every subsystem for `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] for invalid configuration, a malformed
    /// glob, a missing or unreadable root, or a port that cannot be bound.
    pub async fn new(root: &Utf8Path, config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;

        let rules = GlobRules::from_config(&config.watcher)?;
        let watcher = DirWatcher::new(root, rules)?.with_debug(config.debug);
        info!(
            root = %watcher.root(),
            directories = watcher.watched_count(),
            "Watching source tree"
        );

        let executor = Executor::from_config(&config.exec)?;
        let proxy = Proxy::from_config(&config.server)
            .inject(RELOAD_SCRIPT)
            .build()?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
        let listener = server::bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            watcher,
            executor,
            proxy,
            listener,
            local_addr,
            debounce: config.watcher.debounce(),
        })
    }

    /// Returns the address the dev server is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs until `cancel` fires or a subsystem fails.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded by any subsystem.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        let Self {
            mut watcher,
            mut executor,
            proxy,
            listener,
            debounce: window,
            ..
        } = self;

        let shutdown = Shutdown::new(&cancel);
        let token = shutdown.token().clone();

        // Server first, so broadcasts always have a receiver
        let broadcaster = Broadcaster::spawn(token.clone());
        let router = server::router(broadcaster.clone(), proxy, token.clone());
        shutdown.supervise("server", server::serve(listener, router, token.clone()));

        let events = watcher.events().ok_or(WatchError::ChannelClosed)?;
        shutdown.supervise("watcher", watcher.start(token.clone()));

        if let Err(e) = executor.start(&token) {
            shutdown.record(e.into());
        }

        let mut changes = debounce(window, events);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                change = changes.recv() => {
                    let Some(change) = change else {
                        // The watcher stopped without an error being recorded
                        shutdown.cancel();
                        break;
                    };

                    info!(%change, "Change detected, restarting");
                    match executor.restart(&token).await {
                        Ok(()) => {}
                        Err(e) if e.is_cancelled() => continue,
                        Err(e) => {
                            shutdown.record(e.into());
                            continue;
                        }
                    }

                    match broadcaster.broadcast().await {
                        Ok(clients) => debug!(clients, "Sent refresh"),
                        Err(e) => warn!(error = %e, "Could not notify browsers"),
                    }
                }
            }
        }

        info!("Shutting down");
        executor.exited().await;
        shutdown.join().await;

        match shutdown.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    use camino::Utf8PathBuf;
    use futures_util::{Stream, StreamExt};
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.exec.cmd = vec!["sleep".to_owned(), "100".to_owned()];
        config.exec.kill_delay_ms = 1000;
        config.watcher.exclude_file = vec!["*.tmp".to_owned()];
        config.watcher.debounce_ms = 100;
        config.server.port = 0;
        config.server.forward_to_url = "http://127.0.0.1:9".to_owned();
        config
    }

    /// Collects SSE frames until `quiet` passes without new data.
    async fn frames_within<S>(body: &mut S, quiet: Duration) -> usize
    where
        S: Stream<Item = reqwest::Result<axum::body::Bytes>> + Unpin,
    {
        let mut text = String::new();
        while let Ok(Some(chunk)) = tokio::time::timeout(quiet, body.next()).await {
            text.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
        text.matches("data: refresh\n\n").count()
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_at_startup() {
        let (_dir, root) = temp_root();
        let mut config = test_config();
        config.watcher.exclude_file = vec!["[oops".to_owned()];

        let err = Runtime::new(&root, config).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Watch(WatchError::Pattern { .. })));
    }

    #[tokio::test]
    async fn test_missing_root_fails_at_startup() {
        let (_dir, root) = temp_root();
        let err = Runtime::new(&root.join("missing"), test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Watch(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_port_in_use_fails_at_startup() {
        let (_dir, root) = temp_root();
        let taken = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let mut config = test_config();
        config.server.port = taken.local_addr().unwrap().port();

        let err = Runtime::new(&root, config).await.unwrap_err();
        assert!(err.is_startup());
        assert!(matches!(err, RuntimeError::Server(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_spawn_failure_ends_run_with_error() {
        let (_dir, root) = temp_root();
        let mut config = test_config();
        config.exec.cmd = vec!["devloop-definitely-not-a-binary".to_owned()];

        let runtime = Runtime::new(&root, config).await.unwrap();
        let result = tokio::time::timeout(TIMEOUT, runtime.run(CancellationToken::new()))
            .await
            .unwrap();
        assert!(matches!(result, Err(RuntimeError::Exec(_))));
    }

    /// Number of processes the counting command has started so far.
    fn spawn_count(log: &Utf8Path) -> usize {
        std::fs::read_to_string(log).map_or(0, |s| s.lines().count())
    }

    async fn wait_for_spawns(log: &Utf8Path, expected: usize) {
        let reached = tokio::time::timeout(TIMEOUT, async {
            while spawn_count(log) < expected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "only {} spawns", spawn_count(log));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_change_restarts_and_refreshes_browsers() {
        let (_dir, root) = temp_root();
        // The spawn log lives outside the watched tree
        let (_log_dir, log_root) = temp_root();
        let log = log_root.join("spawns.log");

        let mut config = test_config();
        config.exec.cmd = vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!("echo started >> '{log}'; exec sleep 100"),
        ];
        let runtime = Runtime::new(&root, config).await.unwrap();
        let port = runtime.local_addr().port();

        let cancel = CancellationToken::new();
        let run = tokio::spawn(runtime.run(cancel.clone()));

        let response = reqwest::get(format!("http://127.0.0.1:{port}/__dev-server__"))
            .await
            .unwrap();
        let mut body = Box::pin(response.bytes_stream());

        wait_for_spawns(&log, 1).await;

        File::create(root.join("foo.go")).unwrap();
        assert_eq!(frames_within(&mut body, Duration::from_secs(2)).await, 1);
        wait_for_spawns(&log, 2).await;

        File::create(root.join("foo.tmp")).unwrap();
        assert_eq!(frames_within(&mut body, Duration::from_secs(1)).await, 0);
        assert_eq!(spawn_count(&log), 2, "exactly one restart expected");

        cancel.cancel();
        let result = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
