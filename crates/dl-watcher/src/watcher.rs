//! Recursive directory watcher with async event streaming.
//!
//! This module provides the [`DirWatcher`] type that bridges the synchronous
//! `notify` backend to the async tokio runtime while maintaining its own
//! watch set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 notify backend thread (OS events)               │
//! │  ┌───────────────────┐                                          │
//! │  │ RecommendedWatcher │ ── one NonRecursive watch per directory │
//! │  └─────────┬─────────┘                                          │
//! └────────────│────────────────────────────────────────────────────┘
//!              │ unbounded send (raw notify::Event)
//!              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 DirWatcher::start (tokio task)                  │
//! │  Create of a directory ──► walk + watch subtree                 │
//! │  Remove / Rename       ──► drop from watch set                  │
//! │  GlobRules filter      ──► mpsc::Sender<WatchEvent> (cap 1)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The output channel holds a single event, so a slow consumer suspends the
//! loop and event intake proceeds at the consumer's pace.
//!
//! # Usage
//!
//! ```no_run
//! use dl_watcher::{DirWatcher, GlobRules};
//! use camino::Utf8Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), dl_watcher::WatchError> {
//! let rules = GlobRules::new(&["*.tmp"], &[".git"], &[])?;
//! let mut watcher = DirWatcher::new(Utf8Path::new("."), rules)?;
//! let mut events = watcher.events().expect("events taken once");
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(watcher.start(cancel.clone()));
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::WatchError;
use crate::events::{Op, RenamePairs, WatchEvent};
use crate::filter::{FileFilter, GlobRules};

/// Capacity of the filtered output channel.
const EVENT_CHANNEL_CAPACITY: usize = 1;

/// A recursive directory watcher that streams filtered events.
///
/// # Lifecycle
///
/// 1. **Creation**: [`DirWatcher::new`] validates the root, starts the notify
///    backend and walks the tree, registering every non-excluded directory.
///    Enumeration failures surface here, before anything runs.
///
/// 2. **Event stream**: [`DirWatcher::events`] hands out the receiving end of
///    the filtered stream (once).
///
/// 3. **Running**: [`DirWatcher::start`] consumes the watcher and runs the
///    control loop until the token is cancelled or the backend fails.
///
/// The watch set is owned by the loop; nothing else mutates it.
pub struct DirWatcher<F: FileFilter = GlobRules> {
    /// Canonical root of the watched tree.
    root: Utf8PathBuf,

    /// Directory and event filter.
    filter: F,

    /// Log every raw and filtered event at debug level.
    debug: bool,

    /// The OS notification backend.
    backend: RecommendedWatcher,

    /// Raw events forwarded by the backend callback.
    ///
    /// Unbounded: registering a watch waits on the backend thread, so that
    /// thread must never block on this channel.
    raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,

    /// Filtered event sender.
    event_tx: mpsc::Sender<WatchEvent>,

    /// Filtered event receiver, until taken by [`DirWatcher::events`].
    event_rx: Option<mpsc::Receiver<WatchEvent>>,

    /// Directories currently registered with the backend.
    watched: FxHashSet<Utf8PathBuf>,

    /// Rename halves already reported, keyed by tracker.
    renames: RenamePairs,
}

impl<F: FileFilter> std::fmt::Debug for DirWatcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirWatcher")
            .field("root", &self.root)
            .field("watched", &self.watched.len())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl<F: FileFilter> DirWatcher<F> {
    /// Creates a watcher for the tree rooted at `root` and registers the
    /// initial watch set.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the root doesn't exist,
    /// [`WatchError::Notify`] if the backend fails to initialize or refuses a
    /// watch (e.g. the OS watch limit), and [`WatchError::Io`] if the tree
    /// cannot be enumerated.
    pub fn new(root: &Utf8Path, filter: F) -> Result<Self, WatchError> {
        if !root.exists() {
            return Err(WatchError::path_not_found(root));
        }
        let root = root.canonicalize_utf8()?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // The callback runs on the backend's own thread, outside the runtime
        let backend = notify::recommended_watcher(move |res| {
            if raw_tx.send(res).is_err() {
                trace!("Watch loop gone, dropping raw event");
            }
        })?;

        let mut watcher = Self {
            root,
            filter,
            debug: false,
            backend,
            raw_rx,
            event_tx,
            event_rx: Some(event_rx),
            watched: FxHashSet::default(),
            renames: RenamePairs::default(),
        };

        let root = watcher.root.clone();
        watcher.watch_tree(&root)?;
        debug!(root = %watcher.root, dirs = watcher.watched.len(), "Initial watch set registered");

        Ok(watcher)
    }

    /// Enables verbose per-event logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Takes the receiving end of the filtered event stream.
    ///
    /// Returns `None` if it was already taken.
    pub fn events(&mut self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.event_rx.take()
    }

    /// Returns the canonical root being watched.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns `true` if `dir` is in the watch set.
    #[must_use]
    pub fn is_watching(&self, dir: &Utf8Path) -> bool {
        self.watched.contains(dir)
    }

    /// Returns the number of directories in the watch set.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Runs the control loop until `cancel` fires or the backend fails.
    ///
    /// Returns `Ok(())` on cancellation, or when the event consumer has gone
    /// away.
    ///
    /// # Errors
    ///
    /// Returns the first backend or filesystem error; the loop does not
    /// continue after an error.
    pub async fn start(mut self, cancel: CancellationToken) -> Result<(), WatchError> {
        info!(root = %self.root, dirs = self.watched.len(), "Directory watcher started");

        loop {
            let raw = tokio::select! {
                () = cancel.cancelled() => break,
                raw = self.raw_rx.recv() => raw,
            };

            let event = match raw {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(WatchError::ChannelClosed),
            };

            if !self.handle(event, &cancel).await? {
                break;
            }
        }

        info!(root = %self.root, "Directory watcher stopped");
        Ok(())
    }

    /// Processes one raw notification.
    ///
    /// Returns `Ok(false)` when the loop should stop.
    async fn handle(
        &mut self,
        event: notify::Event,
        cancel: &CancellationToken,
    ) -> Result<bool, WatchError> {
        if self.renames.is_duplicate(&event) {
            trace!(?event, "Skipping combined rename event");
            return Ok(true);
        }

        for (index, path) in event.paths.into_iter().enumerate() {
            let Some(op) = Op::from_kind(&event.kind, index) else {
                continue;
            };

            let path = match utf8(path) {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping watch event");
                    continue;
                }
            };

            match op {
                Op::Create => self.watch_if_directory(&path)?,
                Op::Remove | Op::Rename => self.forget(&path),
                Op::Write | Op::Chmod => {}
            }

            let event = WatchEvent::new(path, op);
            if self.debug {
                debug!(%event, "event");
            }

            if !self.filter.should_process(self.relative(&event.path)) {
                if self.debug {
                    debug!(%event, "filtered");
                }
                continue;
            }

            if self.debug {
                debug!(%event, "send");
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(false),
                sent = self.event_tx.send(event) => {
                    if sent.is_err() {
                        debug!("Event channel closed, stopping watcher");
                        return Ok(false);
                    }
                }
            }
        }

        Ok(true)
    }

    /// Watches `path` and its subtree if it is a directory.
    ///
    /// An entry that vanished before it could be inspected is ignored.
    fn watch_if_directory(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => self.watch_tree(path),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %path, "Created entry vanished before stat");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Walks `dir` and registers every directory not pruned by the filter.
    fn watch_tree(&mut self, dir: &Utf8Path) -> Result<(), WatchError> {
        let mut pending = vec![dir.to_owned()];

        while let Some(dir) = pending.pop() {
            let relative = self.relative(&dir);
            if !relative.as_str().is_empty() && !self.filter.should_watch_dir(relative) {
                if self.debug {
                    debug!(dir = %relative, "excluded directory");
                }
                continue;
            }
            if self.watched.contains(&dir) {
                continue;
            }

            match self.backend.watch(dir.as_std_path(), RecursiveMode::NonRecursive) {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e.into()),
            }
            trace!(dir = %dir, "Watching directory");
            self.watched.insert(dir.clone());

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                let entry = entry?;
                // Symlinked directories are not followed
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                match utf8(entry.path()) {
                    Ok(child) => pending.push(child),
                    Err(e) => warn!(error = %e, "Skipping directory"),
                }
            }
        }

        Ok(())
    }

    /// Drops `path` and anything below it from the watch set.
    fn forget(&mut self, path: &Utf8Path) {
        let before = self.watched.len();
        self.watched.retain(|dir| !dir.starts_with(path));
        if self.watched.len() == before {
            return;
        }

        // The OS usually tears the watch down itself; this only tidies the
        // backend's bookkeeping, so failures are expected and harmless.
        if let Err(e) = self.backend.unwatch(path.as_std_path()) {
            trace!(path = %path, error = %e, "Unwatch after removal");
        }
        trace!(path = %path, remaining = self.watched.len(), "Directory left watch set");
    }

    /// Returns `path` relative to the root, or `path` itself if outside it.
    fn relative<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, WatchError> {
    Utf8PathBuf::try_from(path).map_err(|e| WatchError::NonUtf8Path(e.into_path_buf()))
}

fn is_not_found(error: &notify::Error) -> bool {
    match &error.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == ErrorKind::NotFound,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAllFilter;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
    const QUIET_PERIOD: Duration = Duration::from_millis(300);

    struct Harness {
        _dir: TempDir,
        root: Utf8PathBuf,
        events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
        task: JoinHandle<Result<(), WatchError>>,
    }

    impl Harness {
        fn start(dir: TempDir, rules: GlobRules) -> Self {
            let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
            let mut watcher = DirWatcher::new(path, rules)
                .expect("watcher")
                .with_debug(true);
            let events = watcher.events().expect("events");
            let root = watcher.root().to_owned();
            let cancel = CancellationToken::new();
            let task = tokio::spawn(watcher.start(cancel.clone()));
            Self {
                _dir: dir,
                root,
                events,
                cancel,
                task,
            }
        }

        /// Waits for the first event whose path is `path`.
        async fn expect_event(&mut self, path: &Utf8Path) -> WatchEvent {
            tokio::time::timeout(EVENT_TIMEOUT, async {
                loop {
                    let event = self.events.recv().await.expect("stream open");
                    if event.path == path {
                        return event;
                    }
                }
            })
            .await
            .expect("timed out waiting for event")
        }

        /// Collects everything that arrives within the quiet period.
        async fn drain(&mut self) -> Vec<WatchEvent> {
            let mut seen = Vec::new();
            while let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, self.events.recv()).await
            {
                seen.push(event);
            }
            seen
        }

        async fn stop(self) {
            self.cancel.cancel();
            let result = self.task.await.expect("task panicked");
            assert!(result.is_ok());
        }
    }

    fn rules(exclude_file: &[&str], exclude_dirs: &[&str]) -> GlobRules {
        GlobRules::new(exclude_file, exclude_dirs, &[]).expect("valid rules")
    }

    #[tokio::test]
    async fn test_watcher_path_not_found() {
        let path = Utf8Path::new("/nonexistent/path/that/does/not/exist");
        let result = DirWatcher::new(path, AcceptAllFilter);
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_initial_walk_prunes_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg/api")).unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();

        let path = Utf8Path::from_path(dir.path()).unwrap();
        let watcher = DirWatcher::new(path, rules(&[], &[".git"])).unwrap();
        let root = watcher.root().to_owned();

        assert!(watcher.is_watching(&root));
        assert!(watcher.is_watching(&root.join("pkg")));
        assert!(watcher.is_watching(&root.join("pkg/api")));
        assert!(!watcher.is_watching(&root.join(".git")));
        assert!(!watcher.is_watching(&root.join(".git/objects")));
        assert_eq!(watcher.watched_count(), 3);
    }

    #[tokio::test]
    async fn test_created_file_yields_one_event() {
        let mut harness = Harness::start(TempDir::new().unwrap(), rules(&[], &[]));
        let file = harness.root.join("main.go");

        File::create(&file).unwrap();

        let event = harness.expect_event(&file).await;
        assert_eq!(event.op, Op::Create);
        let extra = harness.drain().await;
        assert!(extra.iter().all(|e| e.path != file), "duplicate events: {extra:?}");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_excluded_file_never_reaches_stream() {
        let mut harness = Harness::start(TempDir::new().unwrap(), rules(&["*.tmp"], &[]));
        let excluded = harness.root.join("scratch.tmp");
        let sentinel = harness.root.join("after.go");

        fs::write(&excluded, "ignored").unwrap();
        File::create(&sentinel).unwrap();

        // Everything before the sentinel has been processed by now
        let mut seen = Vec::new();
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while let Some(event) = harness.events.recv().await {
                let done = event.path == sentinel;
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("sentinel event");
        seen.extend(harness.drain().await);

        assert!(seen.iter().all(|e| e.path != excluded), "leaked: {seen:?}");
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_new_subdirectory_is_watched() {
        let mut harness = Harness::start(TempDir::new().unwrap(), rules(&[], &[]));
        let sub = harness.root.join("internal");

        fs::create_dir(&sub).unwrap();
        // The watch is registered before the directory's own event is sent
        harness.expect_event(&sub).await;

        let nested = sub.join("db.go");
        File::create(&nested).unwrap();
        let event = harness.expect_event(&nested).await;
        assert_eq!(event.op, Op::Create);

        harness.stop().await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_rename_is_reported_once_per_path() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("old.go")).unwrap();
        let mut harness = Harness::start(dir, rules(&[], &[]));

        let from = harness.root.join("old.go");
        let to = harness.root.join("new.go");
        fs::rename(&from, &to).unwrap();

        let first = harness.expect_event(&to).await;
        assert_eq!(first.op, Op::Create);

        // The combined notification must not repeat either endpoint
        let rest = harness.drain().await;
        assert!(rest.iter().all(|e| e.path != to && e.path != from), "{rest:?}");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_excluded_dir_contents_are_not_observed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let mut harness = Harness::start(dir, rules(&[], &[".git"]));

        let hidden = harness.root.join(".git/HEAD");
        let sentinel = harness.root.join("visible.go");
        File::create(&hidden).unwrap();
        File::create(&sentinel).unwrap();

        harness.expect_event(&sentinel).await;
        let rest = harness.drain().await;
        assert!(rest.iter().all(|e| e.path != hidden));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let harness = Harness::start(TempDir::new().unwrap(), rules(&[], &[]));
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let mut watcher = DirWatcher::new(path, AcceptAllFilter).unwrap();
        assert!(watcher.events().is_some());
        assert!(watcher.events().is_none());
    }
}
