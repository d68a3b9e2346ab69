//! Poll loop - runs one FileMove pass per interval
//!
//! The [`PollLoop`] owns both backend providers for the lifetime of the
//! process. Each tick acquires the two backends (connecting or
//! reconnecting remote sessions as needed), runs a pass, logs the outcome
//! and sleeps for the fixed interval.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────── tick ─────────────┐
//! │ acquire source ─▶ acquire dest │──▶ run_pass ──▶ log
//! └───────────────────────────────┘                  │
//!        ▲                                           ▼
//!        └────────────── sleep(interval) ◀── cancelled? ──▶ release both
//! ```
//!
//! Passes are blocking and run inline, so cancellation is only observed
//! between passes. A failed pass never stops the loop.

use std::path::PathBuf;
use std::time::Duration;

use dirmirror_backends::BackendProvider;
use dirmirror_core::config::ExecutionPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{run_pass, PassReport};
use crate::SyncError;

/// Counters over the lifetime of a loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub files_copied: u64,
}

/// Fixed-interval driver for FileMove passes
pub struct PollLoop {
    source: Box<dyn BackendProvider>,
    dest: Box<dyn BackendProvider>,
    dustbin: PathBuf,
    policy: ExecutionPolicy,
    interval: Duration,
    stats: LoopStats,
}

impl PollLoop {
    pub fn new(
        source: Box<dyn BackendProvider>,
        dest: Box<dyn BackendProvider>,
        dustbin: impl Into<PathBuf>,
        policy: ExecutionPolicy,
        interval: Duration,
    ) -> Self {
        let dustbin = dustbin.into();
        info!(
            source = %source.kind(),
            dest = %dest.kind(),
            dustbin = %dustbin.display(),
            interval_secs = interval.as_secs(),
            start_level = policy.start_level,
            overwrite = policy.overwrite,
            "Creating poll loop"
        );
        Self {
            source,
            dest,
            dustbin,
            policy,
            interval,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Runs a single pass.
    ///
    /// # Errors
    /// Returns [`SyncError::Acquire`] when either backend cannot be
    /// reached, [`SyncError::Dustbin`] when the dustbin root cannot be
    /// created and [`SyncError::Walk`] when the source tree cannot be
    /// listed.
    pub fn run_once(&mut self) -> Result<PassReport, SyncError> {
        let source = self.source.acquire().map_err(|source| SyncError::Acquire {
            role: "source",
            source,
        })?;
        let dest = self.dest.acquire().map_err(|source| SyncError::Acquire {
            role: "dest",
            source,
        })?;

        run_pass(source, dest, &self.dustbin, &self.policy)
    }

    /// Runs one pass and records its outcome without propagating failure.
    fn tick(&mut self) {
        self.stats.passes += 1;
        match self.run_once() {
            Ok(report) => {
                self.stats.files_copied += u64::from(report.files_copied);
            }
            Err(e) => {
                self.stats.failed_passes += 1;
                error!(pass = self.stats.passes, error = %e, "pass failed, retrying next interval");
            }
        }
    }

    /// Runs passes until `cancel` fires, then releases both sessions.
    ///
    /// The first pass starts immediately.
    pub async fn run(&mut self, cancel: CancellationToken) -> LoopStats {
        info!("Poll loop starting");

        loop {
            self.tick();

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping poll loop");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.shutdown();
        info!(
            passes = self.stats.passes,
            failed = self.stats.failed_passes,
            files = self.stats.files_copied,
            "Poll loop stopped"
        );
        self.stats
    }

    /// Releases both backend sessions.
    pub fn shutdown(&mut self) {
        self.source.release();
        self.dest.release();
    }
}

// ============================================================================
// Unit tests
// ============================================================================
