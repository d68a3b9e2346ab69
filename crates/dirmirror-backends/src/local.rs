//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`Backend`] with blocking `std::fs` calls against a base
//! directory on the host.
//!
//! ## Design Decisions
//!
//! - **No connection state**: the adapter is a plain path holder, so it is
//!   wrapped by [`crate::LocalProvider`] rather than a lifecycle manager.
//! - **Permissions**: directories are created with [`DIR_MODE`] and files
//!   opened with an explicit mode through the unix `*Ext` builders; the
//!   process umask still applies.
//! - **Moves**: `rename(2)`, falling back to copy + unlink for regular files
//!   when the dustbin sits on another filesystem.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dirmirror_core::domain::{DirEntry, EntryKind, EntryMeta, RelPath};
use dirmirror_core::ports::{Backend, BackendError, BackendKind, ByteStream, OpenFlags, DIR_MODE};
use tracing::{debug, instrument, warn};

/// Backend rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    base: PathBuf,
}

impl LocalBackend {
    /// Create an adapter rooted at `base`.
    ///
    /// The directory is not required to exist until the first operation.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &RelPath) -> PathBuf {
        path.to_native(&self.base)
    }
}

/// Convert `std` metadata (from `lstat`) into the storage-agnostic form.
fn meta_from(md: &fs::Metadata) -> EntryMeta {
    let ft = md.file_type();
    let kind = if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    EntryMeta {
        kind,
        size: md.len(),
        mode: mode_bits(md),
        modified: md.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[cfg(unix)]
fn mode_bits(md: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(md.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn mode_bits(_md: &fs::Metadata) -> Option<u32> {
    None
}

fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV
    err.raw_os_error() == Some(18)
}

#[cfg(not(unix))]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn base_path(&self) -> &Path {
        &self.base
    }

    fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError> {
        let native = self.resolve(dir);
        let reader = fs::read_dir(&native).map_err(|e| BackendError::io(dir, e))?;

        let mut entries = Vec::new();
        for item in reader {
            let item = item.map_err(|e| BackendError::io(dir, e))?;
            let name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(
                        dir = %dir,
                        name = %raw.to_string_lossy(),
                        "skipping entry with non-UTF-8 name"
                    );
                    continue;
                }
            };
            // DirEntry::metadata does not traverse symlinks.
            let md = item.metadata().map_err(|e| BackendError::io(dir, e))?;
            entries.push(DirEntry::new(name, meta_from(&md)));
        }
        Ok(entries)
    }

    fn mkdir_all(&self, path: &RelPath) -> Result<(), BackendError> {
        create_dir_all(&self.resolve(path)).map_err(|e| BackendError::io(path, e))
    }

    fn mkdir_all_absolute(&self, root: &Path, path: &RelPath) -> Result<(), BackendError> {
        let target = path.to_native(root);
        create_dir_all(&target).map_err(|e| BackendError::io(target.display(), e))
    }

    fn open(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let file = File::open(self.resolve(path)).map_err(|e| BackendError::io(path, e))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let file = File::create(self.resolve(path)).map_err(|e| BackendError::io(path, e))?;
        Ok(Box::new(file))
    }

    fn open_with_flags(
        &self,
        path: &RelPath,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let mut options = OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .create(flags.create)
            .truncate(flags.truncate);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;

        let file = options
            .open(self.resolve(path))
            .map_err(|e| BackendError::io(path, e))?;
        Ok(Box::new(file))
    }

    #[cfg(unix)]
    fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), BackendError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(self.resolve(path), fs::Permissions::from_mode(mode))
            .map_err(|e| BackendError::io(path, e))
    }

    #[cfg(not(unix))]
    fn chmod(&self, _path: &RelPath, _mode: u32) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            backend: BackendKind::Local,
            operation: "chmod",
        })
    }

    #[cfg(unix)]
    fn chown(&self, path: &RelPath, uid: u32, gid: u32) -> Result<(), BackendError> {
        std::os::unix::fs::chown(self.resolve(path), Some(uid), Some(gid))
            .map_err(|e| BackendError::io(path, e))
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &RelPath, _uid: u32, _gid: u32) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            backend: BackendKind::Local,
            operation: "chown",
        })
    }

    fn remove(&self, path: &RelPath) -> Result<(), BackendError> {
        let native = self.resolve(path);
        let md = fs::symlink_metadata(&native).map_err(|e| BackendError::io(path, e))?;
        let result = if md.is_dir() {
            fs::remove_dir(&native)
        } else {
            fs::remove_file(&native)
        };
        result.map_err(|e| BackendError::io(path, e))
    }

    #[instrument(skip(self), fields(path = %path, dest_root = %dest_root.display()))]
    fn move_to(&self, path: &RelPath, dest_root: &Path) -> Result<(), BackendError> {
        let from = self.resolve(path);
        let to = path.to_native(dest_root);

        match fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                let md = fs::symlink_metadata(&from).map_err(|e| BackendError::io(path, e))?;
                if !md.is_file() {
                    return Err(BackendError::io(path, e));
                }
                debug!("rename crosses filesystems, copying instead");
                fs::copy(&from, &to).map_err(|e| BackendError::io(to.display(), e))?;
                if let Err(e) = fs::remove_file(&from) {
                    warn!(error = %e, "copied to dustbin but could not unlink source");
                    return Err(BackendError::io(path, e));
                }
                Ok(())
            }
            Err(e) => Err(BackendError::io(path, e)),
        }
    }

    fn stat_no_follow(&self, path: &RelPath) -> Result<Option<EntryMeta>, BackendError> {
        match fs::symlink_metadata(self.resolve(path)) {
            Ok(md) => Ok(Some(meta_from(&md))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(path, e)),
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
