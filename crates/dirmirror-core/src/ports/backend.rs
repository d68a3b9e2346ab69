//! Storage backend port (driven/secondary port)
//!
//! This module defines the capability interface every storage variant
//! (local filesystem, SFTP, SMB) implements so that the FileMove engine
//! can mirror a tree without knowing which protocol sits underneath.
//!
//! ## Design Notes
//!
//! - All operations take a [`RelPath`]; each backend resolves it against
//!   its own configured base path.
//! - Operations are blocking. A pass runs to completion on a single thread
//!   before the next one starts, so no method needs to be `Send`.
//! - Streams borrow the backend (`Box<dyn ByteStream + '_>`) because some
//!   protocol clients hand out file handles tied to their session.
//! - `stat_no_follow` reports "absent" as `Ok(None)` so callers can probe
//!   for existence without treating not-found as a failure.

use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{DirEntry, DomainError, EntryMeta, RelPath};
use crate::walker::{self, TreeVisitor, WalkError, WalkStats};

// ============================================================================
// Constants
// ============================================================================

/// Permission bits applied to directories created on any backend
pub const DIR_MODE: u32 = 0o770;

/// Permission bits applied to files copied onto the destination
pub const FILE_MODE: u32 = 0o660;

/// Platform metadata files that are deleted when they cannot be moved to
/// the dustbin
pub const DISPOSABLE_ARTIFACTS: &[&str] = &[".DS_Store"];

/// Age after which a remote session is torn down and re-established
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Returns true if `name` is a disposable platform artifact
#[must_use]
pub fn is_disposable_artifact(name: &str) -> bool {
    DISPOSABLE_ARTIFACTS.contains(&name)
}

// ============================================================================
// BackendKind
// ============================================================================

/// The storage variants understood by the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Sftp,
    Smb,
}

impl BackendKind {
    /// All variants, in registration order
    pub const ALL: [BackendKind; 3] = [BackendKind::Local, BackendKind::Sftp, BackendKind::Smb];

    /// Configuration tag for this variant
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sftp => "sftp",
            Self::Smb => "smb",
        }
    }

    /// Whether this variant talks to a remote server and needs a session
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "sftp" => Ok(Self::Sftp),
            "smb" => Ok(Self::Smb),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown backend type '{other}'"
            ))),
        }
    }
}

// ============================================================================
// BackendError
// ============================================================================

/// Errors returned by backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    /// The entry does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory could not be removed because it still has children
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// A local or remote I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The protocol library reported a failure
    #[error("{backend} error on {path}: {message}")]
    Protocol {
        backend: BackendKind,
        path: String,
        message: String,
    },

    /// A remote session could not be established
    #[error("failed to connect to {target}: {message}")]
    Connection { target: String, message: String },

    /// The backend descriptor is unusable
    #[error("backend configuration error: {0}")]
    Config(String),

    /// The protocol has no equivalent for this operation
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    /// A listed name could not be turned into a relative path
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl BackendError {
    /// Wraps an I/O error, mapping the kinds callers branch on
    pub fn io(path: impl Display, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            _ if is_not_empty(&source) => Self::NotEmpty(path.to_string()),
            _ => Self::Io {
                path: path.to_string(),
                source,
            },
        }
    }

    /// Returns true for a missing entry
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(unix)]
fn is_not_empty(err: &io::Error) -> bool {
    // ENOTEMPTY is 39 on Linux and 66 on the BSDs/macOS
    matches!(err.raw_os_error(), Some(39) | Some(66))
}

#[cfg(not(unix))]
fn is_not_empty(err: &io::Error) -> bool {
    // ERROR_DIR_NOT_EMPTY
    err.raw_os_error() == Some(145)
}

// ============================================================================
// Streams and open flags
// ============================================================================

/// Bidirectional byte stream handed out by `open`/`create`
pub trait ByteStream: Read + Write {}

impl<T: Read + Write + ?Sized> ByteStream for T {}

/// Access mode for [`Backend::open_with_flags`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// Open an existing entry for reading
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Open an existing entry for reading and writing
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// Create or truncate an entry for writing
    #[must_use]
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Capability interface implemented by every storage variant
///
/// ## Implementation Notes
///
/// - `read_dir` returns children in the order the server reports them; it
///   never includes `.` or `..`.
/// - `mkdir_all` is idempotent and applies [`DIR_MODE`] to what it creates.
/// - `remove` deletes a file or an *empty* directory and fails otherwise.
/// - `move_to` relocates `path` to `dest_root/path` on the same backend,
///   keeping the relative path under the new root.
/// - `chown` may be a successful no-op where the protocol has no notion of
///   ownership.
pub trait Backend {
    /// Which variant this is
    fn kind(&self) -> BackendKind;

    /// The base directory every relative path is resolved against
    fn base_path(&self) -> &Path;

    /// Lists the direct children of `dir`
    fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError>;

    /// Recursively visits the tree under the base path
    ///
    /// A listing failure anywhere aborts the whole walk.
    fn walk(&self, visitor: &mut dyn TreeVisitor) -> Result<WalkStats, WalkError> {
        walker::walk(self, visitor)
    }

    /// Creates `path` and every missing ancestor under the base path
    fn mkdir_all(&self, path: &RelPath) -> Result<(), BackendError>;

    /// Creates `root/path` and every missing ancestor, outside the base path
    fn mkdir_all_absolute(&self, root: &Path, path: &RelPath) -> Result<(), BackendError>;

    /// Opens an existing entry for reading
    fn open(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError>;

    /// Creates or truncates an entry for writing
    fn create(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError>;

    /// Opens an entry with explicit flags and creation permissions
    fn open_with_flags(
        &self,
        path: &RelPath,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn ByteStream + '_>, BackendError>;

    /// Changes permission bits
    fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), BackendError>;

    /// Changes ownership
    fn chown(&self, path: &RelPath, uid: u32, gid: u32) -> Result<(), BackendError>;

    /// Removes a file or an empty directory
    fn remove(&self, path: &RelPath) -> Result<(), BackendError>;

    /// Moves `path` to `dest_root/path`
    fn move_to(&self, path: &RelPath, dest_root: &Path) -> Result<(), BackendError>;

    /// Metadata without following symlinks; `Ok(None)` when absent
    fn stat_no_follow(&self, path: &RelPath) -> Result<Option<EntryMeta>, BackendError>;
}
