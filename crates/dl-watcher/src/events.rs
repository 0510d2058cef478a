//! Event types for filesystem change notifications.
//!
//! This module provides [`WatchEvent`] and [`Op`], the filtered events emitted
//! by the [`DirWatcher`](crate::DirWatcher).
//!
//! # Event Flow
//!
//! ```text
//! OS notification (inotify / FSEvents / ReadDirectoryChangesW)
//!        │
//!        ▼
//!   notify::Event ──► Op::from_kind (one Op per path)
//!        │
//!        ▼
//!   GlobRules filter
//!        │
//!        ▼
//!   WatchEvent sent to the consumer (debouncer)
//! ```

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use rustc_hash::FxHashSet;

/// The kind of change observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// A file or directory appeared (including the target of a move).
    Create,
    /// File contents changed.
    Write,
    /// A file or directory was deleted.
    Remove,
    /// A file or directory was moved away from this path.
    Rename,
    /// Permissions or other metadata changed.
    Chmod,
}

impl Op {
    /// Maps a notify event kind to an [`Op`] for the path at `index`.
    ///
    /// Rename notifications that carry both endpoints report the source as
    /// [`Op::Rename`] and the destination as [`Op::Create`], so a directory
    /// moved into the tree is picked up like a freshly created one. Access
    /// notifications carry no change and map to `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dl_watcher::Op;
    /// use notify::EventKind;
    /// use notify::event::{CreateKind, ModifyKind, RenameMode};
    ///
    /// assert_eq!(Op::from_kind(&EventKind::Create(CreateKind::File), 0), Some(Op::Create));
    /// let both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
    /// assert_eq!(Op::from_kind(&both, 0), Some(Op::Rename));
    /// assert_eq!(Op::from_kind(&both, 1), Some(Op::Create));
    /// ```
    #[must_use]
    pub const fn from_kind(kind: &EventKind, index: usize) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::To => Some(Self::Create),
                RenameMode::Both if index > 0 => Some(Self::Create),
                _ => Some(Self::Rename),
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Self::Chmod),
            EventKind::Modify(_) | EventKind::Any => Some(Self::Write),
            EventKind::Access(_) | EventKind::Other => None,
        }
    }

    /// Returns the upper-case label used in log output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Write => "WRITE",
            Self::Remove => "REMOVE",
            Self::Rename => "RENAME",
            Self::Chmod => "CHMOD",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Drops the combined rename notification when its halves were already seen.
///
/// Some backends (inotify) report one move three times: `From` with the
/// source, `To` with the destination, then `Both` with the two paths, all
/// sharing a tracker id. Only the halves are kept; a `Both` without seen
/// halves (backends that only emit the pair) passes through.
#[derive(Debug, Default)]
pub(crate) struct RenamePairs {
    seen: FxHashSet<usize>,
}

impl RenamePairs {
    /// Trackers kept for halves whose `Both` never arrives (moves out of
    /// the tree).
    const CAPACITY: usize = 256;

    /// Returns `true` if `event` repeats halves already reported.
    pub(crate) fn is_duplicate(&mut self, event: &notify::Event) -> bool {
        let EventKind::Modify(ModifyKind::Name(mode)) = event.kind else {
            return false;
        };
        let Some(tracker) = event.tracker() else {
            return false;
        };

        match mode {
            RenameMode::From | RenameMode::To => {
                if self.seen.len() >= Self::CAPACITY {
                    self.seen.clear();
                }
                self.seen.insert(tracker);
                false
            }
            RenameMode::Both => self.seen.remove(&tracker),
            RenameMode::Any | RenameMode::Other => false,
        }
    }
}

/// A filesystem change with a UTF-8, absolute path.
///
/// # Examples
///
/// ```
/// use dl_watcher::{Op, WatchEvent};
/// use camino::Utf8PathBuf;
///
/// let event = WatchEvent::new(Utf8PathBuf::from("/srv/app/main.go"), Op::Write);
/// assert_eq!(event.file_name(), Some("main.go"));
/// assert_eq!(event.to_string(), r#"WRITE "/srv/app/main.go""#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    /// Absolute path of the changed entry.
    pub path: Utf8PathBuf,

    /// What happened to the entry.
    pub op: Op,
}

impl WatchEvent {
    /// Creates a new watch event.
    #[inline]
    #[must_use]
    pub const fn new(path: Utf8PathBuf, op: Op) -> Self {
        Self { path, op }
    }

    /// Returns the base name of the changed entry.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    /// Returns the path of the changed entry.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.op, self.path.as_str())
    }
}
