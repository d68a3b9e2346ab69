//! Collision naming for copies onto an occupied destination
//!
//! When overwriting is disabled and the destination already holds an entry
//! with the same name, the copy is renamed by inserting a counter before
//! the extension: `report.txt` → `report(1).txt` → `report(2).txt`.
//!
//! The extension is everything from the last `.` of the file name, so
//! `archive.tar.gz` becomes `archive.tar(1).gz` and `.bashrc` becomes
//! `(1).bashrc`.

use dirmirror_core::domain::RelPath;
use dirmirror_core::ports::{Backend, BackendError};
use tracing::debug;

/// Splits `name` into stem and extension (extension keeps its dot)
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// The `n`-th numbered variant of `name`
///
/// `numbered_name("report.txt", 2)` is `"report(2).txt"`.
pub fn numbered_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem}({n}){ext}")
}

/// First free destination path for `path`
///
/// Returns `path` unchanged if nothing exists there; otherwise probes
/// `name(1).ext`, `name(2).ext`, ... in the same directory until a probe
/// reports absence.
///
/// # Errors
/// Any probe failure other than "not found" aborts the search.
pub fn resolve(dest: &dyn Backend, path: &RelPath) -> Result<RelPath, BackendError> {
    if dest.stat_no_follow(path)?.is_none() {
        return Ok(path.clone());
    }

    let name = path
        .file_name()
        .ok_or_else(|| BackendError::Config("cannot rename the root".to_string()))?;

    let mut n = 1u32;
    loop {
        let candidate = path.with_file_name(&numbered_name(name, n))?;
        if dest.stat_no_follow(&candidate)?.is_none() {
            debug!(original = %path, renamed = %candidate, "destination name taken");
            return Ok(candidate);
        }
        n += 1;
    }
}
