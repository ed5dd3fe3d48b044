//! Audit trail
//!
//! NIST 800-53: AU-2 (Audit Events), AU-3 (Content of Audit Records), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)
//! Implementation: Structured audit events emitted through `tracing`, serializable as JSON

use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event types
///
/// NIST 800-53: AU-2 (Audit Events)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    /// SFTP session negotiated
    SessionStarted {
        /// Canonical root the session is confined to
        root: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
    /// SFTP session ended
    SessionEnded {
        /// Handles still open at session end, released by the server
        handles_closed: usize,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Session duration in seconds
        duration_secs: i64,
    },
    /// File operation
    FileOperation {
        /// Operation type (OPEN, CLOSE)
        operation: String,
        /// Client path, or the host path for operations on a handle
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether operation succeeded
        success: bool,
        /// Bytes transferred if applicable
        bytes_transferred: Option<u64>,
        /// Error message if failed
        error: Option<String>,
    },
    /// Directory operation
    DirectoryOperation {
        /// Operation type (MKDIR, RMDIR, OPENDIR)
        operation: String,
        /// Client path
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether operation succeeded
        success: bool,
        /// Error message if failed
        error: Option<String>,
    },
    /// Client path resolved outside the root
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    PathEscape {
        /// Operation that was refused
        operation: String,
        /// Client path as sent
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// File operation event from an operation outcome
    pub fn file_operation<T>(
        operation: &str,
        path: &str,
        bytes_transferred: Option<u64>,
        outcome: &crate::Result<T>,
    ) -> Self {
        match outcome {
            Err(Error::PathEscape(_)) => Self::path_escape(operation, path),
            _ => Self::FileOperation {
                operation: operation.to_string(),
                path: path.to_string(),
                timestamp: Utc::now(),
                success: outcome.is_ok(),
                bytes_transferred,
                error: outcome.as_ref().err().map(ToString::to_string),
            },
        }
    }

    /// Directory operation event from an operation outcome
    pub fn directory_operation<T>(operation: &str, path: &str, outcome: &crate::Result<T>) -> Self {
        match outcome {
            Err(Error::PathEscape(_)) => Self::path_escape(operation, path),
            _ => Self::DirectoryOperation {
                operation: operation.to_string(),
                path: path.to_string(),
                timestamp: Utc::now(),
                success: outcome.is_ok(),
                error: outcome.as_ref().err().map(ToString::to_string),
            },
        }
    }

    /// Confinement violation event
    pub fn path_escape(operation: &str, path: &str) -> Self {
        Self::PathEscape {
            operation: operation.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Log the audit event
    ///
    /// NIST 800-53: AU-12 (Audit Generation)
    pub fn log(&self) {
        match self {
            Self::SessionStarted { root, .. } => {
                info!(
                    event = "session_started",
                    root,
                    audit = ?self,
                    "SFTP session started"
                );
            }
            Self::SessionEnded {
                handles_closed,
                duration_secs,
                ..
            } => {
                info!(
                    event = "session_ended",
                    handles_closed,
                    duration_secs,
                    audit = ?self,
                    "SFTP session ended"
                );
            }
            Self::FileOperation {
                operation,
                path,
                success,
                bytes_transferred,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "file_operation",
                        operation,
                        path,
                        bytes = ?bytes_transferred,
                        audit = ?self,
                        "File operation completed"
                    );
                } else {
                    warn!(
                        event = "file_operation_failed",
                        operation,
                        path,
                        error = ?error,
                        audit = ?self,
                        "File operation failed"
                    );
                }
            }
            Self::DirectoryOperation {
                operation,
                path,
                success,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "directory_operation",
                        operation,
                        path,
                        audit = ?self,
                        "Directory operation completed"
                    );
                } else {
                    warn!(
                        event = "directory_operation_failed",
                        operation,
                        path,
                        error = ?error,
                        audit = ?self,
                        "Directory operation failed"
                    );
                }
            }
            Self::PathEscape {
                operation, path, ..
            } => {
                warn!(
                    event = "path_escape",
                    operation,
                    path,
                    audit = ?self,
                    "Access outside root refused"
                );
            }
        }
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_json_carries_event_tag() {
        let event = AuditEvent::SessionEnded {
            handles_closed: 2,
            timestamp: Utc::now(),
            duration_secs: 5,
        };

        let json = event.to_json().unwrap();
        assert!(json.contains("\"event_type\":\"SessionEnded\""));
        assert!(json.contains("\"handles_closed\":2"));

        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_failed_operation_records_error() {
        let outcome: crate::Result<()> = Err(io::Error::from(io::ErrorKind::NotFound).into());
        let event = AuditEvent::file_operation("OPEN", "missing.txt", None, &outcome);

        assert!(matches!(
            event,
            AuditEvent::FileOperation { success: false, error: Some(_), .. }
        ));
    }

    #[test]
    fn test_escape_becomes_path_escape_event() {
        let outcome: crate::Result<()> = Err(Error::PathEscape("out".into()));
        let event = AuditEvent::directory_operation("MKDIR", "out/x", &outcome);

        assert!(matches!(event, AuditEvent::PathEscape { ref path, .. } if path == "out/x"));
        event.log();
    }
}
