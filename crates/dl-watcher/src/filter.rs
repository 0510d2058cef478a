//! Glob filtering for watch events.
//!
//! This module provides the [`FileFilter`] trait consulted by the
//! [`DirWatcher`](crate::DirWatcher) and [`GlobRules`], the glob-based
//! implementation built from the watcher configuration.
//!
//! # Matching granularity
//!
//! Rules are matched against one of two forms of a path, never both:
//!
//! - **Exclude-directory rules** see the path relative to the watched root
//!   (`vendor`, `web/node_modules`, `build/*`). They decide which directories
//!   enter the watch set.
//! - **Exclude-file and include-file rules** see only the base name of the
//!   changed entry (`*_test.go`, `*.tmp`). A file rule containing a path
//!   separator is rejected at construction.
//!
//! `*` never matches across a `/`, so `build/*` excludes `build/out` but not
//! `build/out/deep` unless `build/out` was already excluded (it is pruned, so
//! its children are never watched).
//!
//! # Examples
//!
//! ```
//! use dl_watcher::{FileFilter, GlobRules};
//! use camino::Utf8Path;
//!
//! let rules = GlobRules::new(&["*.tmp"], &[".git"], &[]).unwrap();
//!
//! assert!(rules.should_process(Utf8Path::new("cmd/main.go")));
//! assert!(!rules.should_process(Utf8Path::new("cmd/scratch.tmp")));
//! assert!(!rules.should_watch_dir(Utf8Path::new(".git")));
//! ```

use camino::Utf8Path;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use smallvec::SmallVec;

use dl_core::WatcherConfig;

use crate::error::WatchError;

/// A filter for determining which directories to watch and which events to emit.
///
/// Both methods receive paths relative to the watched root.
///
/// # Thread Safety
///
/// Filters must be [`Send`] and [`Sync`] because the watcher loop runs as a
/// spawned task. They must also be `'static` to be moved into that task.
///
/// # Examples
///
/// ```
/// use dl_watcher::FileFilter;
/// use camino::Utf8Path;
///
/// struct GoOnly;
///
/// impl FileFilter for GoOnly {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() == Some("go")
///     }
/// }
///
/// assert!(GoOnly.should_watch_dir(Utf8Path::new("anything")));
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if an event for `path` should be sent to the consumer.
    fn should_process(&self, path: &Utf8Path) -> bool;

    /// Returns `true` if the directory at `path` should join the watch set.
    ///
    /// Returning `false` prunes the whole subtree. Defaults to watching everything.
    fn should_watch_dir(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// A filter that accepts all files and directories.
///
/// # Examples
///
/// ```
/// use dl_watcher::{AcceptAllFilter, FileFilter};
/// use camino::Utf8Path;
///
/// assert!(AcceptAllFilter.should_process(Utf8Path::new("anything.txt")));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Compiled include/exclude glob rules.
///
/// Construction validates every pattern, so a malformed rule is reported
/// as a [`WatchError::Pattern`] at startup rather than at match time.
#[derive(Debug, Clone)]
pub struct GlobRules {
    /// Base-name rules whose events are always dropped.
    exclude_file: GlobSet,

    /// Root-relative rules for directories that are never watched.
    exclude_dirs: GlobSet,

    /// Base-name rules; when non-empty, only matching events pass.
    include_file: GlobSet,

    /// Source patterns, kept for diagnostics.
    patterns: SmallVec<[String; 8]>,
}

impl GlobRules {
    /// Compiles the three rule lists.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Pattern`] if a pattern does not compile, if an
    /// exclude-directory rule is absolute, or if a file rule contains a
    /// path separator.
    pub fn new<S: AsRef<str>>(
        exclude_file: &[S],
        exclude_dirs: &[S],
        include_file: &[S],
    ) -> Result<Self, WatchError> {
        let mut patterns = SmallVec::new();

        let mut dirs = GlobSetBuilder::new();
        for pattern in exclude_dirs {
            let pattern = pattern.as_ref();
            if Utf8Path::new(pattern).is_absolute() || pattern.starts_with('/') {
                return Err(WatchError::pattern(
                    pattern,
                    "exclude dir must be relative to the watched root",
                ));
            }
            dirs.add(compile(pattern)?);
            patterns.push(pattern.to_owned());
        }

        Ok(Self {
            exclude_file: compile_file_rules(exclude_file, &mut patterns)?,
            exclude_dirs: build(dirs)?,
            include_file: compile_file_rules(include_file, &mut patterns)?,
            patterns,
        })
    }

    /// Compiles the rules found in a [`WatcherConfig`].
    ///
    /// # Errors
    ///
    /// See [`GlobRules::new`].
    pub fn from_config(config: &WatcherConfig) -> Result<Self, WatchError> {
        Self::new(
            &config.exclude_file,
            &config.exclude_dirs,
            &config.include_file,
        )
    }

    /// Returns `true` if the base name matches an exclude-file rule.
    #[must_use]
    pub fn is_file_excluded(&self, name: &str) -> bool {
        self.exclude_file.is_match(name)
    }

    /// Returns `true` if no include rules exist or the base name matches one.
    #[must_use]
    pub fn is_file_included(&self, name: &str) -> bool {
        self.include_file.is_empty() || self.include_file.is_match(name)
    }

    /// Returns `true` if the root-relative path matches an exclude-dir rule.
    #[must_use]
    pub fn is_dir_excluded(&self, relative: &Utf8Path) -> bool {
        self.exclude_dirs.is_match(relative.as_str())
    }

    /// Returns every pattern these rules were compiled from.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl FileFilter for GlobRules {
    fn should_process(&self, path: &Utf8Path) -> bool {
        // Events for an excluded directory entry itself
        if self.is_dir_excluded(path) {
            return false;
        }

        let Some(name) = path.file_name() else {
            return true;
        };

        // Exclusion wins over inclusion
        if self.is_file_excluded(name) {
            return false;
        }

        self.is_file_included(name)
    }

    fn should_watch_dir(&self, path: &Utf8Path) -> bool {
        !self.is_dir_excluded(path)
    }
}

/// Compiles a single glob; `*` and `?` stop at path separators.
fn compile(pattern: &str) -> Result<Glob, WatchError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| WatchError::pattern(pattern, e.kind().to_string()))
}

/// Compiles base-name rules, rejecting any with a directory component.
fn compile_file_rules<S: AsRef<str>>(
    rules: &[S],
    patterns: &mut SmallVec<[String; 8]>,
) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in rules {
        let pattern = pattern.as_ref();
        if pattern.contains('/') || pattern.contains(std::path::MAIN_SEPARATOR) {
            return Err(WatchError::pattern(
                pattern,
                "file rule must be a file name without a directory",
            ));
        }
        builder.add(compile(pattern)?);
        patterns.push(pattern.to_owned());
    }
    build(builder)
}

fn build(builder: GlobSetBuilder) -> Result<GlobSet, WatchError> {
    builder
        .build()
        .map_err(|e| WatchError::pattern(e.glob().unwrap_or_default(), e.kind().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[&str] = &[];

    #[test]
    fn test_accept_all_filter() {
        let filter = AcceptAllFilter;
        assert!(filter.should_process(Utf8Path::new("src/app.ts")));
        assert!(filter.should_watch_dir(Utf8Path::new(".git")));
    }

    #[test]
    fn test_exclude_file_matches_base_name() {
        let rules = GlobRules::new(&["*_test.go"], NONE, NONE).unwrap();
        assert!(!rules.should_process(Utf8Path::new("pkg/api/handler_test.go")));
        assert!(rules.should_process(Utf8Path::new("pkg/api/handler.go")));
    }

    #[test]
    fn test_include_file_restricts_events() {
        let rules = GlobRules::new(NONE, NONE, &["*.go", "*.html"]).unwrap();
        assert!(rules.should_process(Utf8Path::new("main.go")));
        assert!(rules.should_process(Utf8Path::new("web/index.html")));
        assert!(!rules.should_process(Utf8Path::new("README.md")));
    }

    #[test]
    fn test_exclusion_wins_over_inclusion() {
        let rules = GlobRules::new(&["*_templ.go"], NONE, &["*.go"]).unwrap();
        assert!(!rules.should_process(Utf8Path::new("views/page_templ.go")));
        assert!(rules.should_process(Utf8Path::new("views/page.go")));
    }

    #[test]
    fn test_exclude_dirs_are_root_relative() {
        let rules = GlobRules::new(NONE, &[".git", "web/node_modules"], NONE).unwrap();
        assert!(!rules.should_watch_dir(Utf8Path::new(".git")));
        assert!(!rules.should_watch_dir(Utf8Path::new("web/node_modules")));
        // Same base name elsewhere in the tree is still watched
        assert!(rules.should_watch_dir(Utf8Path::new("node_modules")));
        assert!(rules.should_watch_dir(Utf8Path::new("sub/.git")));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let rules = GlobRules::new(NONE, &["build/*"], NONE).unwrap();
        assert!(!rules.should_watch_dir(Utf8Path::new("build/out")));
        assert!(rules.should_watch_dir(Utf8Path::new("build/out/deep")));
        assert!(rules.should_watch_dir(Utf8Path::new("build")));
    }

    #[test]
    fn test_excluded_dir_entry_event_is_dropped() {
        let rules = GlobRules::new(NONE, &[".git"], NONE).unwrap();
        assert!(!rules.should_process(Utf8Path::new(".git")));
        assert!(rules.should_process(Utf8Path::new("src")));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let err = GlobRules::new(&["[a-"], NONE, NONE).unwrap_err();
        assert!(matches!(err, WatchError::Pattern { ref pattern, .. } if pattern == "[a-"));
    }

    #[test]
    fn test_absolute_exclude_dir_is_rejected() {
        let err = GlobRules::new(NONE, &["/var/tmp"], NONE).unwrap_err();
        assert!(err.to_string().contains("relative"));
    }

    #[test]
    fn test_file_rule_with_directory_is_rejected() {
        let err = GlobRules::new(NONE, NONE, &["src/*.go"]).unwrap_err();
        assert!(err.to_string().contains("without a directory"));
    }

    #[test]
    fn test_from_default_config() {
        let rules = GlobRules::from_config(&WatcherConfig::default()).unwrap();
        assert!(!rules.should_process(Utf8Path::new(".devloop.toml")));
        assert!(!rules.should_process(Utf8Path::new("x_test.go")));
        assert!(!rules.should_watch_dir(Utf8Path::new(".git")));
        assert!(rules.should_process(Utf8Path::new("main.go")));
        assert_eq!(rules.patterns().len(), 4);
    }
}
