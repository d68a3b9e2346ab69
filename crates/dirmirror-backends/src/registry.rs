//! Backend factory registry
//!
//! Maps a configuration type tag (`local`, `sftp`, `smb`) to a constructor
//! that turns a [`BackendConfig`] into a [`BackendProvider`]. Lookups
//! happen once at startup, so an unknown or compiled-out tag is reported
//! before the first pass runs.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use dirmirror_core::config::BackendConfig;
use dirmirror_core::ports::{Backend, BackendError, BackendKind};
use thiserror::Error;
use tracing::debug;

use crate::local::LocalBackend;

// ============================================================================
// BackendProvider
// ============================================================================

/// Hands out a ready-to-use backend for one pass
///
/// Remote variants are implemented by [`crate::LifecycleManager`], which
/// may connect or reconnect inside `acquire`; the local variant simply
/// lends its adapter.
pub trait BackendProvider {
    /// Which variant this provider serves
    fn kind(&self) -> BackendKind;

    /// Returns a usable backend, establishing a session if needed
    fn acquire(&mut self) -> Result<&dyn Backend, BackendError>;

    /// Tears down any session; called at shutdown
    fn release(&mut self);
}

/// Provider for the local filesystem: no session, nothing to release
#[derive(Debug, Clone)]
pub struct LocalProvider {
    backend: LocalBackend,
}

impl LocalProvider {
    pub fn new(backend: LocalBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }
}

impl BackendProvider for LocalProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn acquire(&mut self) -> Result<&dyn Backend, BackendError> {
        Ok(&self.backend)
    }

    fn release(&mut self) {}
}

// ============================================================================
// Registry
// ============================================================================

/// Errors raised while turning a descriptor into a provider
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No constructor is registered for the tag
    #[error("unknown backend type '{0}'")]
    UnknownType(String),

    /// The tag names a known variant whose support was compiled out
    #[error("backend type '{kind}' is not available in this build (enable the '{feature}' feature)")]
    Disabled {
        kind: BackendKind,
        feature: &'static str,
    },

    /// The constructor rejected the descriptor
    #[error("invalid {kind} backend configuration: {source}")]
    Construction {
        kind: String,
        #[source]
        source: BackendError,
    },
}

/// Options shared by every constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Age after which remote sessions are re-established
    pub session_max_age: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            session_max_age: dirmirror_core::ports::SESSION_MAX_AGE,
        }
    }
}

/// Builds a provider from a backend descriptor
pub type Constructor =
    fn(&BackendConfig, &ProviderOptions) -> Result<Box<dyn BackendProvider>, BackendError>;

/// Tag → constructor table
#[derive(Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, Constructor>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every variant compiled into this build
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BackendKind::Local.as_str(), local_provider);
        #[cfg(feature = "sftp")]
        registry.register(BackendKind::Sftp.as_str(), crate::sftp::sftp_provider);
        #[cfg(feature = "smb")]
        registry.register(BackendKind::Smb.as_str(), crate::smb::smb_provider);
        registry
    }

    /// Registers (or replaces) the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Builds the provider for `config`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownType`] for an unrecognised tag,
    /// [`RegistryError::Disabled`] for a variant compiled out of this build,
    /// [`RegistryError::Construction`] when the constructor rejects the
    /// descriptor (for example an unreadable identity file).
    pub fn create(
        &self,
        config: &BackendConfig,
        options: &ProviderOptions,
    ) -> Result<Box<dyn BackendProvider>, RegistryError> {
        let Some(constructor) = self.constructors.get(&config.kind) else {
            return Err(match config.backend_kind() {
                Some(kind) => RegistryError::Disabled {
                    kind,
                    feature: kind.as_str(),
                },
                None => RegistryError::UnknownType(config.kind.clone()),
            });
        };

        debug!(kind = %config.kind, "constructing backend provider");
        constructor(config, options).map_err(|source| RegistryError::Construction {
            kind: config.kind.clone(),
            source,
        })
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

fn local_provider(
    config: &BackendConfig,
    _options: &ProviderOptions,
) -> Result<Box<dyn BackendProvider>, BackendError> {
    if config.path.as_os_str().is_empty() {
        return Err(BackendError::Config("local backend needs a path".to_string()));
    }
    Ok(Box::new(LocalProvider::new(LocalBackend::new(&config.path))))
}

// ============================================================================
// Unit tests
// ============================================================================
