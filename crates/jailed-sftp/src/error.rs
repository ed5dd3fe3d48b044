//! Error types for SFTP request handling
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Every variant maps onto exactly one SFTP status code in
//! [`crate::translate`]; nothing here is fatal to the server process.

use thiserror::Error;

/// Result type alias for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP error types
#[derive(Error, Debug)]
pub enum Error {
    /// Host filesystem error, carries the errno when the OS provided one
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or out-of-sequence SFTP packet
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// Client path rejected before touching the filesystem
    ///
    /// NIST 800-53: SI-10 (Input Validation)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Canonical path resolved outside the session root
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    #[error("Path escapes root: {0}")]
    PathEscape(String),

    /// Unknown or already-closed handle
    #[error("Invalid file handle: {0}")]
    InvalidHandle(String),

    /// Too many open handles for one session
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Request type the server does not implement
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for failures with no better category (including handler panics)
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error has security implications and should be audited
    ///
    /// # NIST 800-53: AU-2 (Audit Events), SI-11
    pub fn is_security_event(&self) -> bool {
        match self {
            Self::PathEscape(_) | Self::InvalidPath(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Create invalid handle error
    pub fn invalid_handle(context: impl Into<String>) -> Self {
        Self::InvalidHandle(context.into())
    }

    /// Create resource exhaustion error
    pub fn resource_exhaustion(context: impl Into<String>) -> Self {
        Self::ResourceExhaustion(context.into())
    }

    /// Create protocol error
    pub fn protocol(context: impl Into<String>) -> Self {
        Self::Protocol(context.into())
    }
}
