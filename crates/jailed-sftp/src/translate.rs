//! Error translation at the protocol boundary
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Every handler is composed with [`guarded`], which turns any
//! failure (including a panic) into a status code. Nothing a single request
//! does can tear the session down.

use crate::protocol::StatusCode;
use crate::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Handler outcome: protocol payload, or the status code to send instead
pub type Reply<T> = std::result::Result<T, StatusCode>;

/// Map a host errno to an SFTP status
///
/// Same table OpenSSH-compatible servers use: only "access denied" and "no
/// such file" get dedicated codes, everything else is a generic failure.
pub const fn status_from_errno(errno: i32) -> StatusCode {
    match errno {
        libc::EACCES => StatusCode::PermissionDenied,
        libc::ENOENT | libc::ENOTDIR => StatusCode::NoSuchFile,
        _ => StatusCode::Failure,
    }
}

/// Map a crate error to an SFTP status
pub fn translate(error: &Error) -> StatusCode {
    match error {
        Error::Io(e) => e.raw_os_error().map_or_else(
            || match e.kind() {
                io::ErrorKind::NotFound => StatusCode::NoSuchFile,
                io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                _ => StatusCode::Failure,
            },
            status_from_errno,
        ),
        Error::PathEscape(_) => StatusCode::PermissionDenied,
        Error::InvalidHandle(_) | Error::Protocol(_) => StatusCode::BadMessage,
        Error::NotSupported(_) => StatusCode::OpUnsupported,
        Error::InvalidPath(_)
        | Error::ResourceExhaustion(_)
        | Error::Config(_)
        | Error::Other(_) => StatusCode::Failure,
    }
}

/// Run one handler inside the failure boundary
///
/// Errors are logged with the operation and its arguments, then translated.
/// A panic inside the handler becomes [`Error::Other`], answered with
/// [`StatusCode::Failure`].
pub async fn guarded<T, A, F>(operation: &'static str, args: A, handler: F) -> Reply<T>
where
    A: fmt::Debug,
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            let status = translate(&error);
            if error.is_security_event() {
                warn!(
                    event = "security_event",
                    operation,
                    args = ?args,
                    error = %error,
                    "Security event during SFTP operation"
                );
            }
            debug!(
                operation,
                args = ?args,
                error = %error,
                status = ?status,
                "Error calling {operation}"
            );
            Err(status)
        }
        Err(payload) => {
            let error = Error::Other(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            ));
            let status = translate(&error);
            debug!(
                operation,
                args = ?args,
                error = %error,
                status = ?status,
                "Handler panicked calling {operation}"
            );
            Err(status)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
