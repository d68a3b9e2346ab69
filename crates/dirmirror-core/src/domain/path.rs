//! Root-relative paths
//!
//! Every backend resolves paths against its own base directory, so the
//! engine only ever passes around [`RelPath`] values: slash-separated,
//! normalized, and guaranteed not to climb above the root.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use super::errors::DomainError;

/// A normalized, slash-separated path relative to a backend root
///
/// The empty path denotes the root itself. Components are never empty,
/// never `.`, and never `..`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelPath(String);

impl RelPath {
    /// The root of a backend tree
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize a relative path
    ///
    /// Leading `/` and `./`, repeated separators and `.` components are
    /// dropped.
    ///
    /// # Errors
    /// Returns `DomainError::PathEscapesRoot` for any `..` component and
    /// `DomainError::InvalidPath` for embedded NUL bytes.
    pub fn new(path: &str) -> Result<Self, DomainError> {
        if path.contains('\0') {
            return Err(DomainError::InvalidPath(path.to_string()));
        }

        let mut parts: Vec<&str> = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => return Err(DomainError::PathEscapesRoot(path.to_string())),
                c => parts.push(c),
            }
        }

        Ok(Self(parts.join("/")))
    }

    /// Returns true for the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Slash-separated string form (empty for the root)
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a single entry name
    ///
    /// # Errors
    /// Returns `DomainError::InvalidComponent` if `name` is empty, `.`, `..`
    /// or contains a separator.
    pub fn join(&self, name: &str) -> Result<Self, DomainError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
        {
            return Err(DomainError::InvalidComponent(name.to_string()));
        }

        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// Last component, or `None` for the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Parent directory; the parent of a top-level entry is the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Replaces the last component
    ///
    /// # Errors
    /// Returns an error for the root or an invalid `name`.
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        let parent = self
            .parent()
            .ok_or_else(|| DomainError::InvalidPath("root has no file name".to_string()))?;
        parent.join(name)
    }

    /// Number of components; root children have depth 1
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('/').count()
        }
    }

    /// Iterates over the components
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Resolves this path under a native base directory
    #[must_use]
    pub fn to_native(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }

    /// Resolves this path under a slash-separated remote base
    ///
    /// Used by protocol backends whose servers always speak `/` regardless
    /// of the host platform.
    #[must_use]
    pub fn to_remote(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match (base.is_empty(), self.is_root()) {
            (true, true) => "/".to_string(),
            (true, false) => format!("/{}", self.0),
            (false, true) => base.to_string(),
            (false, false) => format!("{}/{}", base, self.0),
        }
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RelPath {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
