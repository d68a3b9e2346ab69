//! dirmirror core - domain types and the storage backend contract
//!
//! This crate holds everything the synchronization engine needs to know
//! about storage without depending on any particular protocol:
//! - **Domain types** - `RelPath`, `EntryMeta`, `WalkEntry`, `TraversalEvent`
//! - **Backend port** - the [`ports::Backend`] trait every storage variant implements
//! - **Tree walker** - recursive enter/file/exit traversal over any backend
//! - **Configuration** - the YAML document describing source, destination and policy
//! - **Secrets** - at-rest encryption of stored passwords
//!
//! Protocol adapters (local, SFTP, SMB) live in `dirmirror-backends`; the
//! FileMove engine and the poll loop live in `dirmirror-sync`.

pub mod config;
pub mod domain;
pub mod ports;
pub mod secret;
pub mod walker;
