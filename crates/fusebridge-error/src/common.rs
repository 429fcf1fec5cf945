//! Common error types shared across `fusebridge` crates.

use thiserror::Error;

/// Common errors that occur across multiple `fusebridge` crates.
///
/// This enum provides a unified set of error variants for common scenarios
/// like I/O errors, invalid state transitions, and resource lookup failures.
/// Crate-specific errors should wrap this type using the `#[from]` attribute.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    ///
    /// This is the most common error type, wrapping `std::io::Error` for
    /// device I/O and other system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    ///
    /// Used when a requested resource (request id, file handle, node id)
    /// does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid state transition.
    ///
    /// Indicates that an operation was attempted on a resource that is not
    /// in a valid state for that operation (e.g., dispatching on a session
    /// that has already exited).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Permission denied.
    ///
    /// Used when an operation fails due to insufficient permissions.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Internal error.
    ///
    /// A catch-all for unexpected internal errors. Should include enough
    /// context for debugging.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a new permission denied error.
    #[must_use]
    pub fn permission_denied(resource: impl Into<String>) -> Self {
        Self::PermissionDenied(resource.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such device");
        let common_err: CommonError = io_err.into();
        assert!(common_err.is_io());
        assert!(common_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_not_found_error() {
        let err = CommonError::not_found("request 42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: request 42");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = CommonError::invalid_state("session already exited");
        assert_eq!(err.to_string(), "invalid state: session already exited");
    }

    #[test]
    fn test_permission_denied_error() {
        let err = CommonError::permission_denied("/dev/fuse");
        assert_eq!(err.to_string(), "permission denied: /dev/fuse");
    }
}
