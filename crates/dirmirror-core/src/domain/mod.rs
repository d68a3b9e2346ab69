//! Domain entities
//!
//! This module contains the storage-agnostic types shared by every crate:
//! - Root-relative paths
//! - Directory entries, walk entries and traversal events
//! - Domain-specific error types

pub mod entry;
pub mod errors;
pub mod path;

// Re-export commonly used types
pub use entry::{DirEntry, EntryKind, EntryMeta, TraversalEvent, WalkEntry};
pub use errors::DomainError;
pub use path::RelPath;
