//! FileMove engine - one mirroring pass over a source tree
//!
//! A pass walks the source backend once and, for every entry:
//!
//! ```text
//! EnterDir  mkdir on destination (+ chown) ─▶ mkdir under the dustbin
//! File      resolve name ─▶ copy ─▶ chmod/chown ─▶ move source into dustbin
//! ExitDir   remove the source directory if it is now empty
//! ```
//!
//! Per-file failures are logged, counted in the [`PassReport`] and leave
//! the file where it is; the next pass sees it again. Only a listing
//! failure abandons the pass.

use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use dirmirror_core::config::ExecutionPolicy;
use dirmirror_core::domain::{RelPath, WalkEntry};
use dirmirror_core::ports::{is_disposable_artifact, Backend, BackendError, OpenFlags, FILE_MODE};
use dirmirror_core::walker::{TreeVisitor, VisitFlow, WalkStats};
use tracing::{debug, info, instrument, trace, warn};

use crate::collision;
use crate::SyncError;

// ============================================================================
// PassReport
// ============================================================================

/// Summary of one pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Directories created (or confirmed) on the destination and dustbin
    pub directories_mirrored: u32,
    /// Directories whose subtree was skipped after a mkdir failure
    pub directories_skipped: u32,
    /// Files copied to the destination
    pub files_copied: u32,
    /// Files copied under a numbered name because the original was taken
    pub files_renamed: u32,
    /// Files left on the source after a resolve/open/copy failure
    pub files_failed: u32,
    /// Files above the start level, left untouched
    pub files_out_of_scope: u32,
    /// Source files retired into the dustbin
    pub files_moved_to_dustbin: u32,
    /// Copied files that could not be moved into the dustbin
    pub dustbin_failures: u32,
    /// Disposable artifacts deleted after a failed dustbin move
    pub artifacts_deleted: u32,
    /// Emptied source directories removed
    pub directories_removed: u32,
    /// Source directories left in place because removal failed
    pub directories_kept: u32,
    /// Bytes copied to the destination
    pub bytes_copied: u64,
    /// Per-entry error messages (non-fatal)
    pub errors: Vec<String>,
    /// Walker counters
    pub walk: WalkStats,
    /// Wall-clock duration of the pass in milliseconds
    pub duration_ms: u64,
}

impl PassReport {
    /// Whether the pass moved anything
    pub fn is_idle(&self) -> bool {
        self.files_copied == 0 && self.directories_removed == 0 && self.artifacts_deleted == 0
    }
}

// ============================================================================
// FileMover
// ============================================================================

/// Traversal visitor implementing the FileMove algorithm
pub struct FileMover<'a> {
    source: &'a dyn Backend,
    dest: &'a dyn Backend,
    dustbin: &'a Path,
    policy: ExecutionPolicy,
    report: PassReport,
}

impl<'a> FileMover<'a> {
    pub fn new(
        source: &'a dyn Backend,
        dest: &'a dyn Backend,
        dustbin: &'a Path,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            source,
            dest,
            dustbin,
            policy,
            report: PassReport::default(),
        }
    }

    pub fn report(&self) -> &PassReport {
        &self.report
    }

    pub fn into_report(self) -> PassReport {
        self.report
    }

    fn record_error(&mut self, path: &RelPath, stage: &str, err: &dyn std::fmt::Display) {
        self.report.errors.push(format!("{path}: {stage}: {err}"));
    }

    /// Copies `path` from the source to `target` on the destination.
    fn copy(&self, path: &RelPath, target: &RelPath) -> Result<u64, (&'static str, CopyError)> {
        let mut reader = self
            .source
            .open_with_flags(path, OpenFlags::read_write(), 0)
            .map_err(|e| ("open source", CopyError::Backend(e)))?;
        let mut writer = self
            .dest
            .create(target)
            .map_err(|e| ("create target", CopyError::Backend(e)))?;

        let bytes = io::copy(&mut reader, &mut writer).map_err(|e| ("copy", CopyError::Io(e)))?;
        writer.flush().map_err(|e| ("copy", CopyError::Io(e)))?;
        Ok(bytes)
    }

    /// Retires the source file into the dustbin, or deletes it when it is
    /// a disposable artifact that cannot be moved.
    fn retire(&mut self, path: &RelPath) {
        match self.source.move_to(path, self.dustbin) {
            Ok(()) => {
                self.report.files_moved_to_dustbin += 1;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to move file to the dustbin");
                self.report.dustbin_failures += 1;
                self.record_error(path, "move to dustbin", &e);

                if path.file_name().is_some_and(is_disposable_artifact) {
                    match self.source.remove(path) {
                        Ok(()) => {
                            debug!(path = %path, "deleted disposable artifact");
                            self.report.artifacts_deleted += 1;
                        }
                        Err(e) => warn!(path = %path, error = %e, "failed to delete artifact"),
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
enum CopyError {
    Backend(BackendError),
    Io(io::Error),
}

impl std::fmt::Display for CopyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl TreeVisitor for FileMover<'_> {
    fn enter_dir(&mut self, entry: &WalkEntry) -> VisitFlow {
        let path = &entry.path;

        if let Err(e) = self.dest.mkdir_all(path) {
            warn!(path = %path, error = %e, "can't create folder on destination");
            self.record_error(path, "mkdir destination", &e);
            self.report.directories_skipped += 1;
            return VisitFlow::SkipSubtree;
        }
        if self.policy.should_chown() {
            if let Err(e) = self.dest.chown(path, self.policy.uid, self.policy.gid) {
                warn!(path = %path, error = %e, "failed to change folder owner");
            }
        }
        if let Err(e) = self.source.mkdir_all_absolute(self.dustbin, path) {
            warn!(path = %path, error = %e, "can't create folder in dustbin");
            self.record_error(path, "mkdir dustbin", &e);
            self.report.directories_skipped += 1;
            return VisitFlow::SkipSubtree;
        }

        self.report.directories_mirrored += 1;
        VisitFlow::Continue
    }

    fn file(&mut self, entry: &WalkEntry) {
        let path = &entry.path;
        if !self.policy.file_in_scope(entry.level) {
            trace!(path = %path, level = entry.level, "above start level, skipping");
            self.report.files_out_of_scope += 1;
            return;
        }

        let target = if self.policy.overwrite {
            path.clone()
        } else {
            match collision::resolve(self.dest, path) {
                Ok(target) => target,
                Err(e) => {
                    warn!(path = %path, error = %e, "can't resolve destination name");
                    self.record_error(path, "resolve name", &e);
                    self.report.files_failed += 1;
                    return;
                }
            }
        };

        let bytes = match self.copy(path, &target) {
            Ok(bytes) => bytes,
            Err((stage, e)) => {
                warn!(path = %path, target = %target, stage, error = %e, "copy failed");
                self.record_error(path, stage, &e);
                self.report.files_failed += 1;
                return;
            }
        };
        self.report.files_copied += 1;
        self.report.bytes_copied += bytes;
        if &target != path {
            self.report.files_renamed += 1;
        }
        debug!(path = %path, target = %target, bytes, "copied");

        if let Err(e) = self.dest.chmod(&target, FILE_MODE) {
            warn!(path = %target, error = %e, "failed to change file mode");
        }
        if self.policy.should_chown() {
            if let Err(e) = self.dest.chown(&target, self.policy.uid, self.policy.gid) {
                warn!(path = %target, error = %e, "failed to change file owner");
            }
        }

        self.retire(path);
    }

    fn exit_dir(&mut self, entry: &WalkEntry) {
        if !self.policy.dir_in_scope(entry.level) {
            return;
        }
        // Non-empty directories stay; that is the expected outcome whenever
        // something below could not be moved.
        match self.source.remove(&entry.path) {
            Ok(()) => {
                debug!(path = %entry.path, "removed emptied folder");
                self.report.directories_removed += 1;
            }
            Err(e) => {
                trace!(path = %entry.path, error = %e, "folder kept");
                self.report.directories_kept += 1;
            }
        }
    }
}

// ============================================================================
// run_pass
// ============================================================================

/// Runs one FileMove pass from `source` to `dest`.
///
/// `dustbin` is interpreted by the source backend and created before the
/// walk if missing.
///
/// # Errors
/// Returns [`SyncError::Dustbin`] when the dustbin root cannot be created,
/// before anything is copied. Returns [`SyncError::Walk`] when a source
/// directory cannot be listed; whatever was moved before the failure stays
/// moved.
#[instrument(skip_all, fields(source = %source.kind(), dest = %dest.kind()))]
pub fn run_pass(
    source: &dyn Backend,
    dest: &dyn Backend,
    dustbin: &Path,
    policy: &ExecutionPolicy,
) -> Result<PassReport, SyncError> {
    let started = Instant::now();
    if let Err(e) = source.mkdir_all_absolute(dustbin, &RelPath::root()) {
        warn!(
            dustbin = %dustbin.display(),
            error = %e,
            "pass abandoned, dustbin unavailable"
        );
        return Err(SyncError::Dustbin {
            path: dustbin.to_path_buf(),
            source: e,
        });
    }
    let mut mover = FileMover::new(source, dest, dustbin, *policy);

    match source.walk(&mut mover) {
        Ok(stats) => {
            let mut report = mover.into_report();
            report.walk = stats;
            report.duration_ms = started.elapsed().as_millis() as u64;
            if report.is_idle() && report.files_failed == 0 {
                debug!(duration_ms = report.duration_ms, "pass complete, nothing to move");
            } else {
                info!(
                    copied = report.files_copied,
                    failed = report.files_failed,
                    dustbin = report.files_moved_to_dustbin,
                    removed_dirs = report.directories_removed,
                    bytes = report.bytes_copied,
                    duration_ms = report.duration_ms,
                    "pass complete"
                );
            }
            Ok(report)
        }
        Err(e) => {
            let partial = mover.report();
            warn!(
                dir = %e.dir,
                copied = partial.files_copied,
                failed = partial.files_failed,
                "pass abandoned"
            );
            Err(e.into())
        }
    }
}
