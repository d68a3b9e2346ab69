//! dirmirror sync - the FileMove engine and its poll loop
//!
//! Provides:
//! - One-pass mirroring of a source tree onto a destination, with the
//!   source's files retired into a dustbin tree
//! - Collision-free destination naming (`name(n).ext`)
//! - A fixed-interval poll loop owning both backend sessions
//!
//! ## Modules
//!
//! - [`collision`] - numbered renaming when the destination name is taken
//! - [`engine`] - the [`engine::FileMover`] visitor and [`engine::run_pass`]
//! - [`scheduler`] - the [`scheduler::PollLoop`]

pub mod collision;
pub mod engine;
pub mod scheduler;

use std::path::PathBuf;

use dirmirror_core::ports::BackendError;
use dirmirror_core::walker::WalkError;
use thiserror::Error;

/// Errors that abandon a whole pass
///
/// Per-file failures never surface here; they are logged and counted in
/// the [`engine::PassReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// A backend session could not be established
    #[error("cannot acquire {role} backend: {source}")]
    Acquire {
        role: &'static str,
        #[source]
        source: BackendError,
    },

    /// The dustbin root could not be created
    #[error("cannot create dustbin {}: {source}", path.display())]
    Dustbin {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    /// A source directory could not be listed
    #[error(transparent)]
    Walk(#[from] WalkError),
}
