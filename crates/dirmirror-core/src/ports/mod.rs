//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the synchronization core depends on; their
//! implementations live in adapter crates.
//!
//! - [`Backend`] - storage operations for one tree (local, SFTP, SMB)

pub mod backend;

pub use backend::{
    is_disposable_artifact, Backend, BackendError, BackendKind, ByteStream, OpenFlags, DIR_MODE,
    DISPOSABLE_ARTIFACTS, FILE_MODE, SESSION_MAX_AGE,
};
