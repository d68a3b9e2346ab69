//! dirmirror storage adapters
//!
//! Concrete implementations of the [`dirmirror_core::ports::Backend`] port:
//! - [`LocalBackend`] - the host filesystem
//! - `SftpBackend` - SFTP over libssh2 (feature `sftp`, on by default)
//! - `SmbBackend` - SMB2/3 over libsmbclient (feature `smb`)
//!
//! Remote variants are wrapped in a [`LifecycleManager`] that opens sessions
//! lazily and replaces them once they grow stale. The [`BackendRegistry`]
//! turns a configuration descriptor into the right [`BackendProvider`].

pub mod lifecycle;
pub mod local;
pub mod registry;
#[cfg(feature = "sftp")]
pub mod sftp;
#[cfg(feature = "smb")]
pub mod smb;

pub use lifecycle::{Connector, LifecycleManager};
pub use local::LocalBackend;
pub use registry::{BackendProvider, BackendRegistry, LocalProvider, ProviderOptions, RegistryError};
#[cfg(feature = "sftp")]
pub use sftp::{SftpBackend, SftpConnector};
#[cfg(feature = "smb")]
pub use smb::{SmbBackend, SmbConnector};
