//! Connection lifecycle management for remote backends
//!
//! A [`LifecycleManager`] owns at most one live session for a remote
//! backend. Sessions are opened lazily on the first [`acquire`] and
//! re-established once they are older than `max_age`; the previous session
//! is closed best-effort (failures are logged, never returned).
//!
//! ```text
//!   Disconnected ──acquire──▶ Connected(session, created_at)
//!        ▲                        │    │
//!        └───────release──────────┘    └─acquire (stale)─▶ teardown + reconnect
//! ```
//!
//! The manager is `&mut self` throughout: one poll loop owns it, so there
//! is no locking.
//!
//! [`acquire`]: LifecycleManager::acquire

use std::fmt;
use std::time::{Duration, Instant};

use dirmirror_core::ports::{Backend, BackendError, BackendKind, SESSION_MAX_AGE};
use tracing::{debug, info, warn};

use crate::registry::BackendProvider;

/// Protocol-specific session establishment
pub trait Connector {
    /// The live backend produced by a successful handshake
    type Backend: Backend;

    /// Which variant this connector builds
    fn kind(&self) -> BackendKind;

    /// Human-readable remote endpoint, used in logs
    fn target(&self) -> String;

    /// Performs the handshake and authentication
    fn connect(&self) -> Result<Self::Backend, BackendError>;

    /// Closes a session. Called with the session being discarded.
    fn disconnect(&self, backend: Self::Backend) -> Result<(), BackendError>;
}

struct Live<B> {
    backend: B,
    created_at: Instant,
}

/// Owner of one remote session with staleness-based reconnection
pub struct LifecycleManager<C: Connector> {
    connector: C,
    live: Option<Live<C::Backend>>,
    max_age: Duration,
    clock: Box<dyn Fn() -> Instant>,
}

impl<C: Connector> LifecycleManager<C> {
    /// Creates a disconnected manager with the default ten-minute threshold.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            live: None,
            max_age: SESSION_MAX_AGE,
            clock: Box::new(Instant::now),
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Replaces the time source used to age sessions.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.live.is_some()
    }

    /// Age of the live session, if any.
    pub fn session_age(&self) -> Option<Duration> {
        self.live
            .as_ref()
            .map(|live| (self.clock)().saturating_duration_since(live.created_at))
    }

    /// Returns the live session, connecting or reconnecting first if needed.
    ///
    /// # Errors
    /// Returns the connector's error when a new session cannot be
    /// established. The manager is then left disconnected.
    pub fn acquire(&mut self) -> Result<&C::Backend, BackendError> {
        let now = (self.clock)();

        let live = match self.live.take() {
            Some(live) if now.saturating_duration_since(live.created_at) <= self.max_age => live,
            previous => {
                if let Some(stale) = previous {
                    debug!(endpoint = %self.connector.target(), "session expired, reconnecting");
                    self.close(stale);
                }
                let backend = self.connector.connect()?;
                info!(
                    backend = %self.connector.kind(),
                    endpoint = %self.connector.target(),
                    "session established"
                );
                Live {
                    backend,
                    created_at: now,
                }
            }
        };

        Ok(&self.live.insert(live).backend)
    }

    /// Tears down the live session, if any.
    pub fn release(&mut self) {
        if let Some(live) = self.live.take() {
            self.close(live);
            info!(endpoint = %self.connector.target(), "session released");
        }
    }

    fn close(&self, live: Live<C::Backend>) {
        if let Err(e) = self.connector.disconnect(live.backend) {
            warn!(endpoint = %self.connector.target(), error = %e, "error closing session");
        }
    }
}

impl<C: Connector> fmt::Debug for LifecycleManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("kind", &self.connector.kind())
            .field("target", &self.connector.target())
            .field("connected", &self.is_connected())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl<C: Connector> BackendProvider for LifecycleManager<C> {
    fn kind(&self) -> BackendKind {
        self.connector.kind()
    }

    fn acquire(&mut self) -> Result<&dyn Backend, BackendError> {
        let backend = LifecycleManager::acquire(self)?;
        Ok(backend)
    }

    fn release(&mut self) {
        LifecycleManager::release(self);
    }
}

// ============================================================================
// Unit tests
// ============================================================================
