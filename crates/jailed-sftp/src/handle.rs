//! File and directory handles
//!
//! NIST 800-53: SI-11 (Error Handling), AC-12 (Session Termination)
//! Implementation: Handles are owned by one session's [`HandleTable`] and are
//! all released when the session ends.

use crate::protocol::{AttributeRecord, OpenFlags};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Maximum entries returned by one READDIR response
pub const READDIR_CHUNK: usize = 100;

/// Largest READ served by one call; longer requests get a short read
pub const MAX_READ_LEN: u32 = 1 << 20;

/// Direction a file was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only
    Read,
    /// Write-only or read-write
    Write,
    /// Writes land at end of file
    Append,
}

impl OpenMode {
    /// Select the mode for a set of open flags
    ///
    /// WRITE wins over APPEND, APPEND wins over the read-only default.
    pub const fn select(flags: OpenFlags) -> Self {
        if flags.has_write() {
            Self::Write
        } else if flags.has_append() {
            Self::Append
        } else {
            Self::Read
        }
    }
}

/// One open file, usable as both read source and write sink
///
/// The descriptor is exposed in both roles whatever mode it was opened with;
/// the host filesystem rejects the direction the descriptor does not allow.
#[derive(Debug)]
pub struct FileHandle {
    file: Option<File>,
    path: PathBuf,
    mode: OpenMode,
    bytes_transferred: u64,
}

impl FileHandle {
    /// Open `path` according to SFTP open flags
    ///
    /// `create_mode` supplies permission bits for a newly created file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] carrying the host errno if the open fails.
    pub async fn open(path: PathBuf, flags: OpenFlags, create_mode: Option<u32>) -> Result<Self> {
        let mode = OpenMode::select(flags);
        let file = open_options(flags, create_mode).open(&path).await?;
        debug!(path = %path.display(), mode = ?mode, "Opened file handle");

        Ok(Self {
            file: Some(file),
            path,
            mode,
            bytes_transferred: 0,
        })
    }

    /// Host path this handle was opened on
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode selected at open
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Bytes read plus bytes written through this handle
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Whether [`FileHandle::close`] has run
    pub const fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::invalid_handle("Handle is closed"))
    }

    /// Read up to `len` bytes starting at `offset`
    ///
    /// Returns fewer bytes near end of file and none at or past it. `len` is
    /// capped at [`MAX_READ_LEN`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if closed, [`Error::Io`] on host failure.
    pub async fn read(&mut self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let len = len.min(MAX_READ_LEN);
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(len as usize);
        (&mut *file)
            .take(u64::from(len))
            .read_to_end(&mut buffer)
            .await?;

        self.bytes_transferred += buffer.len() as u64;
        Ok(buffer)
    }

    /// Write all of `data` at `offset`
    ///
    /// The write is flushed before returning so a second handle on the same
    /// path observes it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if closed, [`Error::Io`] on host failure
    /// (`EBADF` for a read-only descriptor).
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        self.bytes_transferred += data.len() as u64;
        Ok(())
    }

    /// Metadata of the open descriptor
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if closed, [`Error::Io`] on host failure.
    pub async fn stat(&self) -> Result<std::fs::Metadata> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| Error::invalid_handle("Handle is closed"))?;
        Ok(file.metadata().await?)
    }

    /// Release the descriptor; closing twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if flushing pending writes fails.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            debug!(path = %self.path.display(), "Closed file handle");
        }
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.file.is_some() {
            debug!(path = %self.path.display(), "Dropping unclosed file handle");
        }
    }
}

fn open_options(flags: OpenFlags, create_mode: Option<u32>) -> OpenOptions {
    let mut options = OpenOptions::new();
    let writable = flags.has_write() || flags.has_append();

    options.read(flags.has_read() || !writable);
    options.write(flags.has_write());
    options.append(flags.has_append());

    if writable {
        options.create(flags.has_creat());
        options.truncate(flags.has_trunc());
        if flags.has_creat() && flags.has_excl() {
            options.create_new(true);
        }
    } else {
        // std refuses create/truncate on read-only opens; POSIX allows them
        #[cfg(unix)]
        {
            let mut custom = 0;
            if flags.has_creat() {
                custom |= libc::O_CREAT;
                if flags.has_excl() {
                    custom |= libc::O_EXCL;
                }
            }
            if flags.has_trunc() {
                custom |= libc::O_TRUNC;
            }
            options.custom_flags(custom);
        }
    }

    #[cfg(unix)]
    if let Some(mode) = create_mode {
        options.mode(mode & 0o7777);
    }
    #[cfg(not(unix))]
    let _ = create_mode;

    options
}

/// Directory listing snapshot drained by READDIR
#[derive(Debug)]
pub struct FolderHandle {
    path: PathBuf,
    entries: VecDeque<AttributeRecord>,
}

impl FolderHandle {
    /// Wrap a listing taken at OPENDIR time
    pub fn new(path: PathBuf, entries: Vec<AttributeRecord>) -> Self {
        Self {
            path,
            entries: entries.into(),
        }
    }

    /// Client path the listing was taken from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next batch of at most [`READDIR_CHUNK`] entries; `None` once drained
    pub fn next_chunk(&mut self) -> Option<Vec<AttributeRecord>> {
        if self.entries.is_empty() {
            return None;
        }
        let end = READDIR_CHUNK.min(self.entries.len());
        Some(self.entries.drain(..end).collect())
    }
}

/// Anything a handle id can refer to
#[derive(Debug)]
pub enum OpenHandle {
    /// Open file
    File(FileHandle),
    /// Open directory listing
    Folder(FolderHandle),
}

/// Per-session map from opaque handle ids to open handles
#[derive(Debug)]
pub struct HandleTable {
    handles: HashMap<Vec<u8>, OpenHandle>,
    next_handle_id: u32,
    max_handles: usize,
}

impl HandleTable {
    /// Create an empty table that refuses to grow past `max_handles`
    pub fn new(max_handles: usize) -> Self {
        Self {
            handles: HashMap::new(),
            next_handle_id: 0,
            max_handles,
        }
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// No handles open
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Check that one more handle can be registered
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhaustion`] when the table is full.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.handles.len() >= self.max_handles {
            warn!(
                max_handles = self.max_handles,
                "Maximum file handles reached"
            );
            return Err(Error::resource_exhaustion("Too many open file handles"));
        }
        Ok(())
    }

    /// Register a handle and issue its id
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhaustion`] when the table is full.
    pub fn insert(&mut self, handle: OpenHandle) -> Result<Vec<u8>> {
        self.ensure_capacity()?;

        let handle_id = loop {
            let id = self.next_handle_id.to_be_bytes().to_vec();
            self.next_handle_id = self.next_handle_id.wrapping_add(1);
            if !self.handles.contains_key(&id) {
                break id;
            }
        };

        self.handles.insert(handle_id.clone(), handle);
        Ok(handle_id)
    }

    /// Look up an open file
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if the id is unknown or names a directory.
    pub fn file_mut(&mut self, handle_id: &[u8]) -> Result<&mut FileHandle> {
        match self.handles.get_mut(handle_id) {
            Some(OpenHandle::File(file)) => Ok(file),
            Some(OpenHandle::Folder(_)) => {
                Err(Error::invalid_handle("Handle refers to a directory"))
            }
            None => Err(Error::invalid_handle("Handle does not exist or is closed")),
        }
    }

    /// Look up an open directory listing
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if the id is unknown or names a file.
    pub fn folder_mut(&mut self, handle_id: &[u8]) -> Result<&mut FolderHandle> {
        match self.handles.get_mut(handle_id) {
            Some(OpenHandle::Folder(folder)) => Ok(folder),
            Some(OpenHandle::File(_)) => Err(Error::invalid_handle("Handle refers to a file")),
            None => Err(Error::invalid_handle("Handle does not exist or is closed")),
        }
    }

    /// Take a handle out of the table, leaving the caller to close it
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if the id is unknown (including a second
    /// close of the same id).
    pub fn remove(&mut self, handle_id: &[u8]) -> Result<OpenHandle> {
        self.handles
            .remove(handle_id)
            .ok_or_else(|| Error::invalid_handle("Handle does not exist"))
    }

    /// Release every handle, returning how many were open
    pub async fn close_all(&mut self) -> usize {
        let count = self.handles.len();
        for (_, handle) in self.handles.drain() {
            if let OpenHandle::File(mut file) = handle {
                if let Err(e) = file.close().await {
                    warn!(path = %file.path().display(), error = %e, "Failed to close file handle");
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mode_priority() {
        assert_eq!(OpenMode::select(OpenFlags(OpenFlags::READ)), OpenMode::Read);
        assert_eq!(OpenMode::select(OpenFlags(0)), OpenMode::Read);
        assert_eq!(OpenMode::select(OpenFlags(OpenFlags::WRITE)), OpenMode::Write);
        assert_eq!(
            OpenMode::select(OpenFlags(OpenFlags::READ | OpenFlags::WRITE)),
            OpenMode::Write
        );
        assert_eq!(
            OpenMode::select(OpenFlags(OpenFlags::WRITE | OpenFlags::APPEND)),
            OpenMode::Write
        );
        assert_eq!(OpenMode::select(OpenFlags(OpenFlags::APPEND)), OpenMode::Append);
    }

    #[tokio::test]
    async fn test_write_then_read_through_same_handle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rw.bin");
        let flags = OpenFlags(OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREAT);

        let mut handle = FileHandle::open(path, flags, None).await.unwrap();
        handle.write(0, b"hello world").await.unwrap();

        assert_eq!(handle.read(6, 100).await.unwrap(), b"world");
        assert!(handle.read(11, 100).await.unwrap().is_empty());
        assert_eq!(handle.bytes_transferred(), 16);
    }

    #[tokio::test]
    async fn test_read_length_is_capped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("large.bin");
        std::fs::write(&path, vec![7u8; MAX_READ_LEN as usize + 4096]).unwrap();

        let mut handle = FileHandle::open(path, OpenFlags(OpenFlags::READ), None)
            .await
            .unwrap();

        assert_eq!(handle.read(0, u32::MAX).await.unwrap().len(), MAX_READ_LEN as usize);
        assert_eq!(handle.read(u64::from(MAX_READ_LEN), u32::MAX).await.unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_write_on_read_only_handle_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.txt");
        std::fs::write(&path, b"data").unwrap();

        let mut handle = FileHandle::open(path, OpenFlags(OpenFlags::READ), None)
            .await
            .unwrap();

        assert_eq!(handle.mode(), OpenMode::Read);
        assert!(matches!(handle.write(0, b"x").await, Err(Error::Io(_))));
        assert_eq!(handle.read(0, 4).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_append_ignores_offset() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log.txt");
        std::fs::write(&path, b"line1\n").unwrap();

        let mut handle = FileHandle::open(path.clone(), OpenFlags(OpenFlags::APPEND), None)
            .await
            .unwrap();
        handle.write(0, b"line2\n").await.unwrap();
        handle.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"line1\nline2\n");
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("twice.txt");
        let flags = OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT);

        let mut handle = FileHandle::open(path, flags, None).await.unwrap();
        handle.close().await.unwrap();
        handle.close().await.unwrap();

        assert!(handle.is_closed());
        assert!(matches!(
            handle.read(0, 1).await,
            Err(Error::InvalidHandle(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_without_write_access() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("created.txt");
        let flags = OpenFlags(OpenFlags::READ | OpenFlags::CREAT);

        let mut handle = FileHandle::open(path.clone(), flags, None).await.unwrap();

        assert!(path.exists());
        assert!(handle.read(0, 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_folder_chunks() {
        let entries = (0..250)
            .map(|i| AttributeRecord {
                filename: format!("f{i}"),
                attrs: crate::protocol::FileAttrs::default(),
            })
            .collect();
        let mut folder = FolderHandle::new(PathBuf::from("/x"), entries);

        assert_eq!(folder.next_chunk().unwrap().len(), 100);
        assert_eq!(folder.next_chunk().unwrap().len(), 100);
        assert_eq!(folder.next_chunk().unwrap().len(), 50);
        assert!(folder.next_chunk().is_none());
    }

    #[tokio::test]
    async fn test_table_limits_and_close_all() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = HandleTable::new(2);

        for name in ["a", "b"] {
            let path = temp_dir.path().join(name);
            let flags = OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT);
            let handle = FileHandle::open(path, flags, None).await.unwrap();
            table.insert(OpenHandle::File(handle)).unwrap();
        }

        assert!(matches!(
            table.ensure_capacity(),
            Err(Error::ResourceExhaustion(_))
        ));
        let folder = FolderHandle::new(temp_dir.path().to_path_buf(), Vec::new());
        assert!(matches!(
            table.insert(OpenHandle::Folder(folder)),
            Err(Error::ResourceExhaustion(_))
        ));

        assert_eq!(table.close_all().await, 2);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_table_rejects_wrong_kind_and_stale_ids() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = HandleTable::new(8);
        let folder = FolderHandle::new(temp_dir.path().to_path_buf(), Vec::new());
        let id = table.insert(OpenHandle::Folder(folder)).unwrap();

        assert!(matches!(table.file_mut(&id), Err(Error::InvalidHandle(_))));
        assert!(table.folder_mut(&id).is_ok());

        assert!(matches!(table.remove(&id), Ok(OpenHandle::Folder(_))));
        assert!(matches!(table.remove(&id), Err(Error::InvalidHandle(_))));
        assert!(matches!(table.folder_mut(&id), Err(Error::InvalidHandle(_))));
    }
}
