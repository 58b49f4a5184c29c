//! Error types for loamdb.

use std::io;
use thiserror::Error;

/// Result type alias for loamdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the engine.
///
/// Errors are returned, never thrown across the API boundary, and each
/// carries a human-readable detail string.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Key or resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported by this build or configuration.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Caller supplied an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource is busy (e.g. all buffer-pool frames pinned).
    #[error("Busy: {0}")]
    Busy(String),

    /// Operation timed out.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Operation was aborted.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Allocation failure.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Lock file could not be acquired.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Key is too large.
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value is too large.
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Empty key is not allowed.
    #[error("Empty key is not allowed")]
    EmptyKey,

    /// Invalid file format or magic number.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// Manifest error.
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// Compaction error.
    #[error("Compaction error: {0}")]
    CompactionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Error::ManifestError(msg.into())
    }

    /// Create a busy error.
    pub fn busy<S: Into<String>>(msg: S) -> Self {
        Error::Busy(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::CrcMismatch { .. } | Error::InvalidFormat(_)
        )
    }

    /// Check if this error means a key was simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad data");
        assert_eq!(format!("{}", err), "Corruption detected: bad data");

        let err = Error::KeyTooLarge {
            size: 1000,
            max: 100,
        };
        assert_eq!(format!("{}", err), "Key too large: 1000 bytes (max: 100)");
    }

    #[test]
    fn test_error_is_corruption() {
        assert!(Error::corruption("bad").is_corruption());
        assert!(Error::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!Error::busy("pinned").is_corruption());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
