//! Directory entries and traversal events
//!
//! Backends report listings as [`DirEntry`] values; the walker turns them
//! into [`WalkEntry`] values carrying the root-relative path and depth,
//! and visitors see them bracketed as [`TraversalEvent`]s.

use chrono::{DateTime, Utc};

use super::path::RelPath;

/// Type of a filesystem entry, as seen without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Metadata for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    /// Size in bytes (0 when the backend does not report it)
    pub size: u64,
    /// Unix permission bits, when the backend exposes them
    pub mode: Option<u32>,
    pub modified: Option<DateTime<Utc>>,
}

impl EntryMeta {
    /// Metadata for a directory with no further detail
    #[must_use]
    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            size: 0,
            mode: None,
            modified: None,
        }
    }

    /// Metadata for a regular file of the given size
    #[must_use]
    pub fn file(size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            mode: None,
            modified: None,
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Bare entry name, no separators
    pub name: String,
    pub meta: EntryMeta,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, meta: EntryMeta) -> Self {
        Self {
            name: name.into(),
            meta,
        }
    }
}

/// An entry reached during a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walked backend's root
    pub path: RelPath,
    pub meta: EntryMeta,
    /// Depth below the root; the root's direct children are level 1
    pub level: usize,
}

/// Ordered traversal notifications
///
/// `EnterDir` and `ExitDir` bracket a subtree; `File` events for the
/// directory's children appear between them in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalEvent {
    EnterDir(WalkEntry),
    File(WalkEntry),
    ExitDir(WalkEntry),
}

impl TraversalEvent {
    /// The entry this event refers to
    #[must_use]
    pub fn entry(&self) -> &WalkEntry {
        match self {
            Self::EnterDir(e) | Self::File(e) | Self::ExitDir(e) => e,
        }
    }

    /// Short label used in logs and test assertions
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::EnterDir(e) => format!("enter:{}@{}", e.path, e.level),
            Self::File(e) => format!("file:{}@{}", e.path, e.level),
            Self::ExitDir(e) => format!("exit:{}@{}", e.path, e.level),
        }
    }
}
