//! Domain error types
//!
//! Errors raised while constructing or validating domain values, such as
//! relative paths that would escape their storage root.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A relative path tried to climb above its root via `..`
    #[error("Path escapes its root: {0}")]
    PathEscapesRoot(String),

    /// A single path component was expected but a nested path was given
    #[error("Invalid path component: {0}")]
    InvalidComponent(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("a\0b".to_string());
        assert_eq!(err.to_string(), "Invalid path: a\0b");

        let err = DomainError::PathEscapesRoot("../etc".to_string());
        assert_eq!(err.to_string(), "Path escapes its root: ../etc");

        let err = DomainError::InvalidComponent("a/b".to_string());
        assert_eq!(err.to_string(), "Invalid path component: a/b");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidPath("/path".to_string());
        let err2 = DomainError::InvalidPath("/path".to_string());
        let err3 = DomainError::InvalidPath("/other".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
