//! Generic recursive tree walker
//!
//! Walks any [`Backend`] depth-first, listing each directory exactly once
//! and notifying a [`TreeVisitor`] in pre-order with exit:
//!
//! ```text
//! enter a@1
//!   file a/x@2
//!   enter a/b@2
//!     file a/b/y@3
//!   exit a/b@2
//! exit a@1
//! file z@1
//! ```
//!
//! The walk is strictly recursive: a listing failure at any depth unwinds
//! the whole call stack and is returned to the caller. No sibling or
//! ancestor is visited after the failure.

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::domain::{RelPath, TraversalEvent, WalkEntry};
use crate::ports::backend::{Backend, BackendError};

/// What the walker should do after `enter_dir`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitFlow {
    /// Descend into the directory, then emit `exit_dir`
    Continue,
    /// Do not list the directory and do not emit `exit_dir` for it
    SkipSubtree,
}

/// Receiver of traversal notifications
pub trait TreeVisitor {
    /// Called before a directory's children are listed
    fn enter_dir(&mut self, entry: &WalkEntry) -> VisitFlow;

    /// Called for every non-directory entry
    fn file(&mut self, entry: &WalkEntry);

    /// Called after all of a directory's children have been visited
    fn exit_dir(&mut self, entry: &WalkEntry);
}

/// A directory listing failed and the walk was abandoned
#[derive(Debug, Error)]
#[error("failed to list directory '{dir}': {source}")]
pub struct WalkError {
    /// Directory whose listing failed (root-relative)
    pub dir: RelPath,
    #[source]
    pub source: BackendError,
}

/// Counters gathered during one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub files: u64,
    pub skipped_subtrees: u64,
    pub max_level: usize,
}

/// Walks the whole tree of `backend`
///
/// # Errors
/// Returns [`WalkError`] for the first directory that cannot be listed.
pub fn walk<B: Backend + ?Sized>(
    backend: &B,
    visitor: &mut dyn TreeVisitor,
) -> Result<WalkStats, WalkError> {
    let mut stats = WalkStats::default();
    walk_dir(backend, &RelPath::root(), 1, visitor, &mut stats)?;
    debug!(
        backend = %backend.kind(),
        directories = stats.directories,
        files = stats.files,
        skipped = stats.skipped_subtrees,
        "walk complete"
    );
    Ok(stats)
}

fn walk_dir<B: Backend + ?Sized>(
    backend: &B,
    dir: &RelPath,
    level: usize,
    visitor: &mut dyn TreeVisitor,
    stats: &mut WalkStats,
) -> Result<(), WalkError> {
    let children = backend.read_dir(dir).map_err(|source| WalkError {
        dir: dir.clone(),
        source,
    })?;

    for child in children {
        let path = match dir.join(&child.name) {
            Ok(path) => path,
            Err(e) => {
                warn!(dir = %dir, name = %child.name, error = %e, "skipping entry");
                continue;
            }
        };
        let entry = WalkEntry {
            path,
            meta: child.meta,
            level,
        };
        stats.max_level = stats.max_level.max(level);

        if entry.meta.is_dir() {
            stats.directories += 1;
            match visitor.enter_dir(&entry) {
                VisitFlow::Continue => {
                    walk_dir(backend, &entry.path, level + 1, visitor, stats)?;
                    visitor.exit_dir(&entry);
                }
                VisitFlow::SkipSubtree => {
                    trace!(path = %entry.path, "skipping subtree");
                    stats.skipped_subtrees += 1;
                }
            }
        } else {
            stats.files += 1;
            visitor.file(&entry);
        }
    }

    Ok(())
}

// ============================================================================
// EventRecorder
// ============================================================================

/// Visitor that records every event it sees
///
/// Useful for dry runs and tests. Directories listed in `skip` are
/// entered but not descended into.
#[derive(Debug, Default)]
pub struct EventRecorder {
    pub events: Vec<TraversalEvent>,
    skip: Vec<RelPath>,
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to descend into `path`
    #[must_use]
    pub fn skipping(mut self, path: RelPath) -> Self {
        self.skip.push(path);
        self
    }

    /// Compact labels for every recorded event
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.events.iter().map(TraversalEvent::label).collect()
    }
}

impl TreeVisitor for EventRecorder {
    fn enter_dir(&mut self, entry: &WalkEntry) -> VisitFlow {
        self.events.push(TraversalEvent::EnterDir(entry.clone()));
        if self.skip.contains(&entry.path) {
            VisitFlow::SkipSubtree
        } else {
            VisitFlow::Continue
        }
    }

    fn file(&mut self, entry: &WalkEntry) {
        self.events.push(TraversalEvent::File(entry.clone()));
    }

    fn exit_dir(&mut self, entry: &WalkEntry) {
        self.events.push(TraversalEvent::ExitDir(entry.clone()));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::domain::{DirEntry, EntryMeta};
    use crate::ports::backend::{BackendKind, ByteStream, OpenFlags};

    /// Listing-only backend driven by a table of directory contents
    struct ScriptedBackend {
        base: PathBuf,
        listings: HashMap<String, Vec<DirEntry>>,
        fail_on: Option<String>,
        listed: RefCell<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                base: PathBuf::from("/scripted"),
                listings: HashMap::new(),
                fail_on: None,
                listed: RefCell::new(Vec::new()),
            }
        }

        fn dir(mut self, path: &str, children: Vec<DirEntry>) -> Self {
            self.listings.insert(path.to_string(), children);
            self
        }

        fn failing_on(mut self, path: &str) -> Self {
            self.fail_on = Some(path.to_string());
            self
        }
    }

    fn d(name: &str) -> DirEntry {
        DirEntry::new(name, EntryMeta::dir())
    }

    fn f(name: &str) -> DirEntry {
        DirEntry::new(name, EntryMeta::file(1))
    }

    impl Backend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        fn base_path(&self) -> &Path {
            &self.base
        }

        fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError> {
            self.listed.borrow_mut().push(dir.as_str().to_string());
            if self.fail_on.as_deref() == Some(dir.as_str()) {
                return Err(BackendError::Protocol {
                    backend: BackendKind::Local,
                    path: dir.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.listings.get(dir.as_str()).cloned().unwrap_or_default())
        }

        fn mkdir_all(&self, _path: &RelPath) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn mkdir_all_absolute(&self, _root: &Path, _path: &RelPath) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn open(&self, _path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
            unimplemented!()
        }

        fn create(&self, _path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
            unimplemented!()
        }

        fn open_with_flags(
            &self,
            _path: &RelPath,
            _flags: OpenFlags,
            _perm: u32,
        ) -> Result<Box<dyn ByteStream + '_>, BackendError> {
            unimplemented!()
        }

        fn chmod(&self, _path: &RelPath, _mode: u32) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn chown(&self, _path: &RelPath, _uid: u32, _gid: u32) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn remove(&self, _path: &RelPath) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn move_to(&self, _path: &RelPath, _dest_root: &Path) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn stat_no_follow(&self, _path: &RelPath) -> Result<Option<EntryMeta>, BackendError> {
            unimplemented!()
        }
    }

    fn sample_tree() -> ScriptedBackend {
        ScriptedBackend::new()
            .dir("", vec![d("a"), f("z.txt")])
            .dir("a", vec![f("x.txt"), d("b")])
            .dir("a/b", vec![f("y.txt")])
    }

    #[test]
    fn test_walk_emits_preorder_with_exit() {
        let backend = sample_tree();
        let mut recorder = EventRecorder::new();

        let stats = backend.walk(&mut recorder).unwrap();

        assert_eq!(
            recorder.labels(),
            vec![
                "enter:a@1",
                "file:a/x.txt@2",
                "enter:a/b@2",
                "file:a/b/y.txt@3",
                "exit:a/b@2",
                "exit:a@1",
                "file:z.txt@1",
            ]
        );
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.max_level, 3);
    }

    #[test]
    fn test_walk_keeps_backend_listing_order() {
        let backend = ScriptedBackend::new().dir("", vec![f("c"), f("a"), f("b")]);
        let mut recorder = EventRecorder::new();

        backend.walk(&mut recorder).unwrap();

        assert_eq!(recorder.labels(), vec!["file:c@1", "file:a@1", "file:b@1"]);
    }

    #[test]
    fn test_walk_lists_each_directory_once() {
        let backend = sample_tree();
        let mut recorder = EventRecorder::new();

        backend.walk(&mut recorder).unwrap();

        assert_eq!(*backend.listed.borrow(), vec!["", "a", "a/b"]);
    }

    #[test]
    fn test_listing_failure_aborts_entire_walk() {
        let backend = sample_tree().failing_on("a/b");
        let mut recorder = EventRecorder::new();

        let err = backend.walk(&mut recorder).unwrap_err();

        assert_eq!(err.dir.as_str(), "a/b");
        // Nothing after the failing directory is visited, not even the
        // remaining root-level sibling or the pending exits.
        assert_eq!(
            recorder.labels(),
            vec!["enter:a@1", "file:a/x.txt@2", "enter:a/b@2"]
        );
        assert!(err.to_string().contains("a/b"));
    }

    #[test]
    fn test_root_listing_failure() {
        let backend = sample_tree().failing_on("");
        let mut recorder = EventRecorder::new();

        let err = backend.walk(&mut recorder).unwrap_err();

        assert!(err.dir.is_root());
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_skip_subtree_suppresses_descent_and_exit() {
        let backend = sample_tree();
        let mut recorder = EventRecorder::new().skipping(RelPath::new("a").unwrap());

        let stats = backend.walk(&mut recorder).unwrap();

        assert_eq!(recorder.labels(), vec!["enter:a@1", "file:z.txt@1"]);
        assert_eq!(stats.skipped_subtrees, 1);
        assert_eq!(*backend.listed.borrow(), vec![""]);
    }

    #[test]
    fn test_invalid_child_names_are_skipped() {
        let backend = ScriptedBackend::new()
            .dir("", vec![f("bad/name"), d(".."), f("ok.txt"), d("a")])
            .dir("a", vec![f("")]);
        let mut recorder = EventRecorder::new();

        let stats = backend.walk(&mut recorder).unwrap();

        assert_eq!(recorder.labels(), vec!["file:ok.txt@1", "enter:a@1", "exit:a@1"]);
        assert_eq!(stats.files, 1);
        assert_eq!(*backend.listed.borrow(), vec!["", "a"]);
    }

    #[test]
    fn test_empty_tree() {
        let backend = ScriptedBackend::new();
        let mut recorder = EventRecorder::new();

        let stats = backend.walk(&mut recorder).unwrap();

        assert!(recorder.events.is_empty());
        assert_eq!(stats, WalkStats::default());
    }
}
