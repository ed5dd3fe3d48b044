//! SFTP Protocol Implementation
//!
//! Wire format of the SSH File Transfer Protocol, version 3, as defined in
//! draft-ietf-secsh-filexfer-02. Packets arrive with their `u32` length prefix
//! already stripped by the framing layer; everything here works on
//! `type byte + payload`.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

/// SFTP Protocol Version
pub const SFTP_VERSION: u32 = 3;

/// SFTP message types (as defined in the SFTP specification)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close file
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Get file attributes by path
    Lstat = 7,
    /// Get file attributes by handle
    Fstat = 8,
    /// Set file attributes by path
    Setstat = 9,
    /// Set file attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Get real path
    Realpath = 16,
    /// Get file attributes by path (follow symlinks)
    Stat = 17,
    /// Rename file or directory
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (for directory listings)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Init),
            2 => Ok(Self::Version),
            3 => Ok(Self::Open),
            4 => Ok(Self::Close),
            5 => Ok(Self::Read),
            6 => Ok(Self::Write),
            7 => Ok(Self::Lstat),
            8 => Ok(Self::Fstat),
            9 => Ok(Self::Setstat),
            10 => Ok(Self::Fsetstat),
            11 => Ok(Self::Opendir),
            12 => Ok(Self::Readdir),
            13 => Ok(Self::Remove),
            14 => Ok(Self::Mkdir),
            15 => Ok(Self::Rmdir),
            16 => Ok(Self::Realpath),
            17 => Ok(Self::Stat),
            18 => Ok(Self::Rename),
            19 => Ok(Self::Readlink),
            20 => Ok(Self::Symlink),
            101 => Ok(Self::Status),
            102 => Ok(Self::Handle),
            103 => Ok(Self::Data),
            104 => Ok(Self::Name),
            105 => Ok(Self::Attrs),
            200 => Ok(Self::Extended),
            201 => Ok(Self::ExtendedReply),
            _ => Err(crate::Error::Protocol(format!(
                "Unknown message type: {value}"
            ))),
        }
    }
}

/// SFTP Status codes (SSH_FX_*)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Default human-readable message sent alongside the code
    pub const fn message(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation unsupported",
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code as Self
    }
}

/// File open flags (SSH_FXF_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing
    pub const WRITE: u32 = 0x0000_0002;
    /// Writes go to the end of the file
    pub const APPEND: u32 = 0x0000_0004;
    /// Create the file if it does not exist
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate an existing file
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail if the file already exists (with CREAT)
    pub const EXCL: u32 = 0x0000_0020;

    /// READ bit set
    pub const fn has_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// WRITE bit set
    pub const fn has_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    /// APPEND bit set
    pub const fn has_append(self) -> bool {
        self.0 & Self::APPEND != 0
    }

    /// CREAT bit set
    pub const fn has_creat(self) -> bool {
        self.0 & Self::CREAT != 0
    }

    /// TRUNC bit set
    pub const fn has_trunc(self) -> bool {
        self.0 & Self::TRUNC != 0
    }

    /// EXCL bit set
    pub const fn has_excl(self) -> bool {
        self.0 & Self::EXCL != 0
    }
}

/// File attributes (ATTRS structure)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// Size in bytes
    pub size: Option<u64>,
    /// Owner user id
    pub uid: Option<u32>,
    /// Owner group id
    pub gid: Option<u32>,
    /// Full `st_mode`: file type bits and permission bits
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
}

impl FileAttrs {
    const FLAG_SIZE: u32 = 0x0000_0001;
    const FLAG_UIDGID: u32 = 0x0000_0002;
    const FLAG_PERMISSIONS: u32 = 0x0000_0004;
    const FLAG_ACMODTIME: u32 = 0x0000_0008;
    const FLAG_EXTENDED: u32 = 0x8000_0000;

    /// Snapshot host metadata into wire attributes
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: Some(metadata.len()),
            uid: Some(metadata.uid()),
            gid: Some(metadata.gid()),
            permissions: Some(metadata.mode()),
            atime: Some(epoch_secs_u32(metadata.atime())),
            mtime: Some(epoch_secs_u32(metadata.mtime())),
        }
    }

    /// Snapshot host metadata into wire attributes
    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let kind = if metadata.is_dir() { 0o040_000 } else { 0o100_000 };
        let perms = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
        let secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        };

        Self {
            size: Some(metadata.len()),
            uid: None,
            gid: None,
            permissions: Some(kind | perms),
            atime: secs(metadata.accessed()),
            mtime: secs(metadata.modified()),
        }
    }

    /// Encode file attributes to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }

        buf
    }

    /// Decode file attributes from bytes
    ///
    /// Extended attribute pairs are consumed and discarded.
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = Self::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }

        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf)?);
            attrs.mtime = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_EXTENDED != 0 {
            let count = codec::get_u32(buf)?;
            for _ in 0..count {
                codec::get_bytes(buf)?;
                codec::get_bytes(buf)?;
            }
        }

        Ok(attrs)
    }
}

fn epoch_secs_u32(secs: i64) -> u32 {
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

/// Metadata snapshot plus the name the client sees for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    /// Bare entry name in listings, full resolved path for `stat`
    pub filename: String,
    /// Wire attributes
    pub attrs: FileAttrs,
}

/// Six months, the `ls` cutoff between showing a time and showing a year
const RECENT_SECS: i64 = 15_552_000;

impl AttributeRecord {
    /// Build a record from host metadata
    pub fn from_metadata(filename: impl Into<String>, metadata: &std::fs::Metadata) -> Self {
        Self {
            filename: filename.into(),
            attrs: FileAttrs::from_metadata(metadata),
        }
    }

    /// `ls -l` style line sent as the `longname` of SSH_FXP_NAME entries
    pub fn long_name(&self) -> String {
        let mode = self
            .attrs
            .permissions
            .map_or_else(|| "?---------".to_string(), mode_string);

        let date = match self
            .attrs
            .mtime
            .and_then(|t| DateTime::<Utc>::from_timestamp(i64::from(t), 0))
        {
            Some(mtime) if (Utc::now().timestamp() - mtime.timestamp()).abs() > RECENT_SECS => {
                mtime.format("%d %b %Y").to_string()
            }
            Some(mtime) => mtime.format("%d %b %H:%M").to_string(),
            None => "(unknown date)".to_string(),
        };

        format!(
            "{}   1 {:<8} {:<8} {:>8} {:<12} {}",
            mode,
            self.attrs.uid.unwrap_or(0),
            self.attrs.gid.unwrap_or(0),
            self.attrs.size.unwrap_or(0),
            date,
            self.filename
        )
    }
}

/// Render `st_mode` as the ten-character `ls` permission string
fn mode_string(mode: u32) -> String {
    let kind = match mode & 0o170_000 {
        0o040_000 => 'd',
        0o120_000 => 'l',
        0o020_000 => 'c',
        0o060_000 => 'b',
        0o010_000 => 'p',
        0o140_000 => 's',
        0o100_000 => '-',
        _ => '?',
    };

    let triple = |bits: u32, special: bool, marker: char| {
        let exec = match (bits & 0o1 != 0, special) {
            (true, true) => marker,
            (false, true) => marker.to_ascii_uppercase(),
            (true, false) => 'x',
            (false, false) => '-',
        };
        [
            if bits & 0o4 != 0 { 'r' } else { '-' },
            if bits & 0o2 != 0 { 'w' } else { '-' },
            exec,
        ]
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    out.extend(triple((mode >> 6) & 0o7, mode & 0o4000 != 0, 's'));
    out.extend(triple((mode >> 3) & 0o7, mode & 0o2000 != 0, 's'));
    out.extend(triple(mode & 0o7, mode & 0o1000 != 0, 't'));
    out
}

/// Decoded client request: the closed set of operations this server speaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// SSH_FXP_INIT
    Init {
        /// Client protocol version
        version: u32,
    },
    /// SSH_FXP_OPEN
    Open {
        /// Request id
        id: u32,
        /// Client path
        path: String,
        /// SSH_FXF_* flags
        flags: OpenFlags,
        /// Initial attributes for created files
        attrs: FileAttrs,
    },
    /// SSH_FXP_CLOSE
    Close {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_READ
    Read {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
        /// Byte offset
        offset: u64,
        /// Maximum bytes to return
        len: u32,
    },
    /// SSH_FXP_WRITE
    Write {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
        /// Byte offset
        offset: u64,
        /// Bytes to write
        data: Vec<u8>,
    },
    /// SSH_FXP_LSTAT
    Lstat {
        /// Request id
        id: u32,
        /// Client path
        path: String,
    },
    /// SSH_FXP_FSTAT
    Fstat {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_OPENDIR
    Opendir {
        /// Request id
        id: u32,
        /// Client path
        path: String,
    },
    /// SSH_FXP_READDIR
    Readdir {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_MKDIR
    Mkdir {
        /// Request id
        id: u32,
        /// Client path
        path: String,
        /// Requested attributes
        attrs: FileAttrs,
    },
    /// SSH_FXP_RMDIR
    Rmdir {
        /// Request id
        id: u32,
        /// Client path
        path: String,
    },
    /// SSH_FXP_REALPATH
    Realpath {
        /// Request id
        id: u32,
        /// Client path
        path: String,
    },
    /// SSH_FXP_STAT
    Stat {
        /// Request id
        id: u32,
        /// Client path
        path: String,
    },
    /// Any request type this server does not implement
    Unsupported {
        /// Request id
        id: u32,
        /// Raw message type byte
        kind: u8,
    },
}

impl Request {
    /// Decode one packet (type byte followed by payload)
    pub fn decode(packet: &[u8]) -> crate::Result<Self> {
        let (&kind, mut buf) = packet
            .split_first()
            .ok_or_else(|| crate::Error::protocol("Empty packet"))?;
        let buf = &mut buf;

        let Ok(msg_type) = MessageType::try_from(kind) else {
            return Ok(Self::Unsupported {
                id: codec::get_u32(buf)?,
                kind,
            });
        };

        let request = match msg_type {
            MessageType::Init => Self::Init {
                version: codec::get_u32(buf)?,
            },
            MessageType::Open => Self::Open {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
                flags: OpenFlags(codec::get_u32(buf)?),
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Close => Self::Close {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Read => Self::Read {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                len: codec::get_u32(buf)?,
            },
            MessageType::Write => Self::Write {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                data: codec::get_bytes(buf)?,
            },
            MessageType::Lstat => Self::Lstat {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
            },
            MessageType::Fstat => Self::Fstat {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Opendir => Self::Opendir {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
            },
            MessageType::Readdir => Self::Readdir {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Mkdir => Self::Mkdir {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Rmdir => Self::Rmdir {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
            },
            MessageType::Realpath => Self::Realpath {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
            },
            MessageType::Stat => Self::Stat {
                id: codec::get_u32(buf)?,
                path: codec::get_string(buf)?,
            },
            _ => Self::Unsupported {
                id: codec::get_u32(buf)?,
                kind,
            },
        };

        Ok(request)
    }

    /// Best-effort request id of a packet that failed to decode
    pub fn peek_id(packet: &[u8]) -> Option<u32> {
        match packet {
            [kind, a, b, c, d, ..] if *kind != MessageType::Init as u8 => {
                Some(u32::from_be_bytes([*a, *b, *c, *d]))
            }
            _ => None,
        }
    }

    /// Operation name used in logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Lstat { .. } => "lstat",
            Self::Fstat { .. } => "fstat",
            Self::Opendir { .. } => "opendir",
            Self::Readdir { .. } => "readdir",
            Self::Mkdir { .. } => "mkdir",
            Self::Rmdir { .. } => "rmdir",
            Self::Realpath { .. } => "realpath",
            Self::Stat { .. } => "stat",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Server response, encoded as one packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_FXP_VERSION
    Version {
        /// Server protocol version
        version: u32,
    },
    /// SSH_FXP_STATUS
    Status {
        /// Request id
        id: u32,
        /// Outcome
        code: StatusCode,
        /// Human-readable message
        message: String,
    },
    /// SSH_FXP_HANDLE
    Handle {
        /// Request id
        id: u32,
        /// Opaque handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_DATA
    Data {
        /// Request id
        id: u32,
        /// Bytes read
        data: Vec<u8>,
    },
    /// SSH_FXP_NAME
    Name {
        /// Request id
        id: u32,
        /// Entries with their attributes
        entries: Vec<AttributeRecord>,
    },
    /// SSH_FXP_ATTRS
    Attrs {
        /// Request id
        id: u32,
        /// Attributes
        attrs: FileAttrs,
    },
}

impl Response {
    /// STATUS response carrying the code's default message
    pub fn status(id: u32, code: StatusCode) -> Self {
        Self::Status {
            id,
            code,
            message: code.message().to_string(),
        }
    }

    /// Encode response to bytes (without the length prefix)
    pub fn encode(&self) -> BytesMut {
        let mut response = BytesMut::new();

        match self {
            Self::Version { version } => {
                response.put_u8(MessageType::Version as u8);
                response.put_u32(*version);
            }
            Self::Status { id, code, message } => {
                response.put_u8(MessageType::Status as u8);
                response.put_u32(*id);
                response.put_u32((*code).into());
                codec::put_string(&mut response, message);
                codec::put_string(&mut response, "en"); // language tag
            }
            Self::Handle { id, handle } => {
                response.put_u8(MessageType::Handle as u8);
                response.put_u32(*id);
                codec::put_bytes(&mut response, handle);
            }
            Self::Data { id, data } => {
                response.put_u8(MessageType::Data as u8);
                response.put_u32(*id);
                codec::put_bytes(&mut response, data);
            }
            Self::Name { id, entries } => {
                response.put_u8(MessageType::Name as u8);
                response.put_u32(*id);
                response.put_u32(u32::try_from(entries.len()).unwrap_or(u32::MAX));
                for entry in entries {
                    codec::put_string(&mut response, &entry.filename);
                    codec::put_string(&mut response, &entry.long_name());
                    response.put(entry.attrs.encode());
                }
            }
            Self::Attrs { id, attrs } => {
                response.put_u8(MessageType::Attrs as u8);
                response.put_u32(*id);
                response.put(attrs.encode());
            }
        }

        response
    }
}

/// Helper functions for encoding/decoding SFTP protocol primitives
pub mod codec {
    use bytes::{Buf, BufMut, BytesMut};

    /// Encode a string as SFTP string (length + data)
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    /// Decode an SFTP string
    pub fn get_string(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Protocol(format!("Invalid UTF-8 string: {e}")))
    }

    /// Encode bytes as SFTP string (length + data)
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(u32::try_from(data.len()).unwrap_or(u32::MAX));
        buf.put_slice(data);
    }

    /// Decode SFTP bytes
    pub fn get_bytes(buf: &mut &[u8]) -> crate::Result<Vec<u8>> {
        let len = get_u32(buf)? as usize;
        if buf.remaining() < len {
            return Err(crate::Error::protocol("Insufficient data for bytes"));
        }

        let bytes = buf[..len].to_vec();
        buf.advance(len);

        Ok(bytes)
    }

    /// Decode a big-endian u32
    pub fn get_u32(buf: &mut &[u8]) -> crate::Result<u32> {
        if buf.remaining() < 4 {
            return Err(crate::Error::protocol("Insufficient data for u32"));
        }
        Ok(buf.get_u32())
    }

    /// Decode a big-endian u64
    pub fn get_u64(buf: &mut &[u8]) -> crate::Result<u64> {
        if buf.remaining() < 8 {
            return Err(crate::Error::protocol("Insufficient data for u64"));
        }
        Ok(buf.get_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_packet(path: &str, pflags: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Open as u8);
        buf.put_u32(7);
        codec::put_string(&mut buf, path);
        buf.put_u32(pflags);
        buf.put_u32(0);
        buf.to_vec()
    }

    #[test]
    fn test_decode_open() {
        let packet = open_packet("a/b.txt", OpenFlags::WRITE | OpenFlags::CREAT);
        let request = Request::decode(&packet).unwrap();

        assert_eq!(
            request,
            Request::Open {
                id: 7,
                path: "a/b.txt".to_string(),
                flags: OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT),
                attrs: FileAttrs::default(),
            }
        );
    }

    #[test]
    fn test_decode_truncated_packet_fails() {
        let packet = open_packet("a/b.txt", OpenFlags::READ);
        let truncated = &packet[..packet.len() - 3];

        assert!(Request::decode(truncated).is_err());
        assert_eq!(Request::peek_id(truncated), Some(7));
    }

    #[test]
    fn test_decode_unimplemented_type_keeps_id() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Rename as u8);
        buf.put_u32(42);
        codec::put_string(&mut buf, "old");
        codec::put_string(&mut buf, "new");

        assert_eq!(
            Request::decode(&buf).unwrap(),
            Request::Unsupported {
                id: 42,
                kind: MessageType::Rename as u8
            }
        );
    }

    #[test]
    fn test_decode_unknown_type_byte() {
        let packet = [250u8, 0, 0, 0, 9];
        assert_eq!(
            Request::decode(&packet).unwrap(),
            Request::Unsupported { id: 9, kind: 250 }
        );
    }

    #[test]
    fn test_decode_attrs_skips_extended_pairs() {
        let mut buf = BytesMut::new();
        buf.put_u32(FileAttrs::FLAG_PERMISSIONS | FileAttrs::FLAG_EXTENDED);
        buf.put_u32(0o755);
        buf.put_u32(1);
        codec::put_string(&mut buf, "vendor@example.com");
        codec::put_string(&mut buf, "value");
        buf.put_u8(0xAA);

        let mut slice = &buf[..];
        let attrs = FileAttrs::decode(&mut slice).unwrap();

        assert_eq!(attrs.permissions, Some(0o755));
        assert_eq!(slice, &[0xAA]);
    }

    #[test]
    fn test_status_encoding() {
        let encoded = Response::status(3, StatusCode::NoSuchFile).encode();

        assert_eq!(encoded[0], MessageType::Status as u8);
        assert_eq!(&encoded[1..5], &3u32.to_be_bytes());
        assert_eq!(&encoded[5..9], &2u32.to_be_bytes());
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(0o100_644), "-rw-r--r--");
        assert_eq!(mode_string(0o040_755), "drwxr-xr-x");
        assert_eq!(mode_string(0o041_777), "drwxrwxrwt");
        assert_eq!(mode_string(0o104_755), "-rwsr-xr-x");
        assert_eq!(mode_string(0o120_777), "lrwxrwxrwx");
    }

    #[test]
    fn test_long_name_layout() {
        let record = AttributeRecord {
            filename: "b.txt".to_string(),
            attrs: FileAttrs {
                size: Some(5),
                uid: Some(1000),
                gid: Some(1000),
                permissions: Some(0o100_644),
                atime: Some(0),
                mtime: Some(0),
            },
        };

        assert_eq!(
            record.long_name(),
            "-rw-r--r--   1 1000     1000            5 01 Jan 1970  b.txt"
        );
    }

    #[test]
    fn test_long_name_without_attributes() {
        let record = AttributeRecord {
            filename: "/".to_string(),
            attrs: FileAttrs::default(),
        };

        assert!(record.long_name().starts_with("?---------   1 0"));
        assert!(record.long_name().contains("(unknown date)"));
    }
}
