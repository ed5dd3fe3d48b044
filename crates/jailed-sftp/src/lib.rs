//! # Jailed SFTP
//!
//! Server side of the SFTP subsystem, confined to one root directory.
//!
//! This crate implements the protocol as defined in:
//! - RFC 4254: SSH Connection Protocol (subsystem channels)
//! - draft-ietf-secsh-filexfer-02: SSH File Transfer Protocol, version 3
//!
//! The SSH transport and authentication are supplied by the host daemon. The
//! crate receives an already-authenticated byte stream, frames SFTP packets
//! off it, and answers them against the local filesystem.
//!
//! ## Features
//!
//! - Path confinement to a root, including symlinks that point outside it
//! - Host errno translation to SFTP status codes
//! - File operations (open, read, write, stat)
//! - Directory operations (list, create, remove)
//! - Structured audit events

pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod translate;

pub use config::{Config, LogFormat};
pub use dispatcher::{SftpDispatcher, SftpServerInterface};
pub use error::{Error, Result};
pub use handle::{FileHandle, OpenMode};
pub use resolver::PathResolver;
pub use session::{Session, serve};
pub use translate::Reply;
