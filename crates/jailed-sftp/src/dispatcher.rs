//! SFTP request dispatcher
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-11 (Error Handling), AU-2 (Audit Events)
//! STIG: V-222566, V-222596
//! Implementation: One handler per SFTP verb. Each resolves its path through
//! the session's [`PathResolver`], touches the host filesystem, and returns a
//! [`Reply`]. Every handler runs inside [`guarded`], so a failing request
//! produces a status code and never ends the session.

use crate::audit::AuditEvent;
use crate::handle::FileHandle;
use crate::protocol::{AttributeRecord, FileAttrs, OpenFlags};
use crate::resolver::{PathResolver, client_absolute};
use crate::translate::{Reply, guarded};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Server side of an SFTP session, one method per protocol verb
///
/// Handle-based verbs (READ, WRITE, CLOSE, FSTAT, READDIR) never reach this
/// trait: the session serves them from its handle table.
#[async_trait]
pub trait SftpServerInterface: Send + Sync {
    /// INIT/VERSION exchange completed
    async fn session_started(&mut self) {}

    /// Session over; `handles_closed` handles were still open and were released
    async fn session_ended(&mut self, _handles_closed: usize) {}

    /// Entries of a directory, bare names, in listing order
    async fn list_folder(&self, path: &str) -> Reply<Vec<AttributeRecord>>;

    /// Create a directory
    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> Reply<()>;

    /// Remove an empty directory
    async fn rmdir(&self, path: &str) -> Reply<()>;

    /// Open or create a file
    async fn open(&self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> Reply<FileHandle>;

    /// Attributes of a path, following symlinks
    async fn stat(&self, path: &str) -> Reply<AttributeRecord>;

    /// Attributes of a path, not following a final symlink
    async fn lstat(&self, path: &str) -> Reply<AttributeRecord>;

    /// Client-visible absolute form of a path (REALPATH)
    async fn canonicalize(&self, path: &str) -> Reply<String>;
}

/// Local filesystem implementation confined to one root
#[derive(Debug)]
pub struct SftpDispatcher {
    resolver: PathResolver,
    audit_enabled: bool,
    started_at: Option<DateTime<Utc>>,
}

impl SftpDispatcher {
    /// Create a dispatcher confined to `root`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the root cannot be canonicalized or is not
    /// a directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            resolver: PathResolver::new(root).await?,
            audit_enabled: true,
            started_at: None,
        })
    }

    /// Enable or disable audit events
    #[must_use]
    pub const fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    fn audit(&self, event: AuditEvent) {
        if self.audit_enabled {
            event.log();
        }
    }

    fn audit_escape<T>(&self, operation: &str, path: &str, outcome: &Result<T>) {
        if matches!(outcome, Err(Error::PathEscape(_))) {
            self.audit(AuditEvent::path_escape(operation, path));
        }
    }

    async fn read_folder(&self, path: &str) -> Result<Vec<AttributeRecord>> {
        let resolved = self.resolver.resolve(path).await?;
        debug!("Listing directory: {:?}", resolved);

        let mut read_dir = fs::read_dir(&resolved).await?;
        let mut entries = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = self.entry_metadata(&entry.path()).await?;
            entries.push(AttributeRecord::from_metadata(
                entry.file_name().to_string_lossy(),
                &metadata,
            ));
        }

        Ok(entries)
    }

    /// Metadata for one listed entry
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    /// Symlinks are followed only when the target stays under the root.
    /// Dangling and escaping links report their own metadata.
    async fn entry_metadata(&self, entry_path: &Path) -> Result<Metadata> {
        let link = fs::symlink_metadata(entry_path).await?;
        if !link.file_type().is_symlink() {
            return Ok(link);
        }

        match fs::canonicalize(entry_path).await {
            Ok(target) if target.starts_with(self.root()) => Ok(fs::metadata(&target).await?),
            Ok(target) => {
                debug!(entry = ?entry_path, target = ?target, "Listing symlink leading outside root");
                Ok(link)
            }
            Err(_) => Ok(link),
        }
    }

    async fn create_folder(&self, path: &str, attrs: &FileAttrs) -> Result<()> {
        let resolved = self.resolver.resolve(path).await?;
        debug!("Creating directory: {:?}", resolved);

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        if let Some(mode) = attrs.permissions {
            builder.mode(mode & 0o7777);
        }
        #[cfg(not(unix))]
        let _ = attrs;

        builder.create(&resolved).await?;
        Ok(())
    }

    async fn remove_folder(&self, path: &str) -> Result<()> {
        let resolved = self.resolver.resolve(path).await?;
        debug!("Removing directory: {:?}", resolved);

        fs::remove_dir(&resolved).await?;
        Ok(())
    }

    async fn open_file(&self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> Result<FileHandle> {
        let resolved = self.resolver.resolve(path).await?;
        FileHandle::open(resolved, flags, attrs.permissions).await
    }

    async fn stat_path(&self, path: &str) -> Result<AttributeRecord> {
        let resolved = self.resolver.resolve(path).await?;
        let metadata = fs::metadata(&resolved).await?;
        Ok(AttributeRecord::from_metadata(
            resolved.display().to_string(),
            &metadata,
        ))
    }

    async fn lstat_path(&self, path: &str) -> Result<AttributeRecord> {
        let resolved = self.resolver.resolve_no_follow(path).await?;
        let metadata = fs::symlink_metadata(&resolved).await?;
        Ok(AttributeRecord::from_metadata(
            resolved.display().to_string(),
            &metadata,
        ))
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        // Resolution runs for its confinement check; the host path stays private
        self.resolver.resolve(path).await?;
        Ok(client_absolute(path))
    }
}

#[async_trait]
impl SftpServerInterface for SftpDispatcher {
    async fn session_started(&mut self) {
        self.started_at = Some(Utc::now());
        info!(root = %self.root().display(), "SFTP session initialized");
        self.audit(AuditEvent::SessionStarted {
            root: self.root().display().to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn session_ended(&mut self, handles_closed: usize) {
        let now = Utc::now();
        let duration_secs = self
            .started_at
            .map_or(0, |start| now.signed_duration_since(start).num_seconds());
        self.audit(AuditEvent::SessionEnded {
            handles_closed,
            timestamp: now,
            duration_secs,
        });
    }

    async fn list_folder(&self, path: &str) -> Reply<Vec<AttributeRecord>> {
        guarded("list_folder", (path,), async {
            let outcome = self.read_folder(path).await;
            self.audit(AuditEvent::directory_operation("OPENDIR", path, &outcome));
            outcome
        })
        .await
    }

    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> Reply<()> {
        guarded("mkdir", (path, attrs), async {
            let outcome = self.create_folder(path, attrs).await;
            self.audit(AuditEvent::directory_operation("MKDIR", path, &outcome));
            outcome
        })
        .await
    }

    async fn rmdir(&self, path: &str) -> Reply<()> {
        guarded("rmdir", (path,), async {
            let outcome = self.remove_folder(path).await;
            self.audit(AuditEvent::directory_operation("RMDIR", path, &outcome));
            outcome
        })
        .await
    }

    async fn open(&self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> Reply<FileHandle> {
        guarded("open", (path, flags, attrs), async {
            let outcome = self.open_file(path, flags, attrs).await;
            self.audit(AuditEvent::file_operation("OPEN", path, None, &outcome));
            outcome
        })
        .await
    }

    async fn stat(&self, path: &str) -> Reply<AttributeRecord> {
        guarded("stat", (path,), async {
            let outcome = self.stat_path(path).await;
            self.audit_escape("STAT", path, &outcome);
            outcome
        })
        .await
    }

    async fn lstat(&self, path: &str) -> Reply<AttributeRecord> {
        guarded("lstat", (path,), async {
            let outcome = self.lstat_path(path).await;
            self.audit_escape("LSTAT", path, &outcome);
            outcome
        })
        .await
    }

    async fn canonicalize(&self, path: &str) -> Reply<String> {
        guarded("canonicalize", (path,), async {
            let outcome = self.realpath(path).await;
            self.audit_escape("REALPATH", path, &outcome);
            outcome
        })
        .await
    }
}
