//! SFTP session loop
//!
//! NIST 800-53: SI-11 (Error Handling), AC-12 (Session Termination)
//! STIG: V-222566, V-222601
//! Implementation: Frames packets off the transport, performs the INIT/VERSION
//! handshake, and answers every decoded request. Handles opened during the
//! session are released when it ends, however it ends.

use crate::audit::AuditEvent;
use crate::config::Config;
use crate::dispatcher::{SftpDispatcher, SftpServerInterface};
use crate::handle::{FolderHandle, HandleTable, OpenHandle};
use crate::protocol::{
    AttributeRecord, FileAttrs, Request, Response, SFTP_VERSION, StatusCode,
};
use crate::translate::{Reply, guarded, translate};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::LengthDelimitedCodec;
use tracing::{debug, error, info, warn};

/// Room for request and reply headers around a `max_packet_size` payload
///
/// Reads are clamped to leave this much for the DATA header, and inbound
/// frames may exceed the payload limit by this much.
const HEADER_ALLOWANCE: u32 = 1024;

/// One client's SFTP session over a server interface
pub struct Session<S> {
    server: S,
    handles: HandleTable,
    initialized: bool,
    max_packet_size: u32,
    max_read_len: u32,
    audit_enabled: bool,
}

impl<S: SftpServerInterface> Session<S> {
    /// Create a session using the limits in `config`
    pub fn new(server: S, config: &Config) -> Self {
        Self {
            server,
            handles: HandleTable::new(config.max_handles),
            initialized: false,
            max_packet_size: config.max_packet_size,
            max_read_len: config.max_packet_size.saturating_sub(HEADER_ALLOWANCE),
            audit_enabled: config.logging.audit_enabled,
        }
    }

    /// Server interface serving this session
    pub const fn server(&self) -> &S {
        &self.server
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Answer one packet (type byte plus payload)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the session cannot continue: a packet
    /// before INIT, a repeated INIT, or a malformed packet with no readable
    /// request id.
    pub async fn handle_packet(&mut self, packet: &[u8]) -> Result<Response> {
        let request = match Request::decode(packet) {
            Ok(request) => request,
            Err(e) => {
                return match Request::peek_id(packet) {
                    Some(id) if self.initialized => {
                        warn!(request_id = id, error = %e, "Malformed SFTP request");
                        Ok(Response::status(id, StatusCode::BadMessage))
                    }
                    _ => {
                        error!(error = %e, "Unreadable SFTP packet");
                        Err(e)
                    }
                };
            }
        };

        debug!(operation = request.name(), "Received SFTP request");

        match request {
            Request::Init { version } if !self.initialized => {
                info!(client_version = version, "SFTP Init");
                self.initialized = true;
                self.server.session_started().await;
                Ok(Response::Version {
                    version: SFTP_VERSION,
                })
            }
            Request::Init { .. } => {
                error!("Received INIT on an initialized session");
                Err(Error::protocol("Duplicate INIT"))
            }
            other if !self.initialized => {
                error!(operation = other.name(), "Received request before initialization");
                Err(Error::protocol("Session not initialized"))
            }
            other => Ok(self.dispatch(other).await),
        }
    }

    async fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::Open {
                id,
                path,
                flags,
                attrs,
            } => {
                if let Err(e) = self.handles.ensure_capacity() {
                    return self.refuse_open(id, "OPEN", &path, e);
                }
                match self.server.open(&path, flags, &attrs).await {
                    Ok(file) => self.register(id, OpenHandle::File(file)),
                    Err(code) => Response::status(id, code),
                }
            }
            Request::Close { id, handle } => {
                let reply = guarded("close", (id,), self.close_handle(&handle)).await;
                status_response(id, reply)
            }
            Request::Read {
                id,
                handle,
                offset,
                len,
            } => {
                let len = len.min(self.max_read_len);
                let handles = &mut self.handles;
                let reply = guarded("read", (id, offset, len), async {
                    handles.file_mut(&handle)?.read(offset, len).await
                })
                .await;
                match reply {
                    Ok(data) if data.is_empty() => Response::status(id, StatusCode::Eof),
                    Ok(data) => Response::Data { id, data },
                    Err(code) => Response::status(id, code),
                }
            }
            Request::Write {
                id,
                handle,
                offset,
                data,
            } => {
                let handles = &mut self.handles;
                let reply = guarded("write", (id, offset, data.len()), async {
                    handles.file_mut(&handle)?.write(offset, &data).await
                })
                .await;
                status_response(id, reply)
            }
            Request::Fstat { id, handle } => {
                let handles = &mut self.handles;
                let reply = guarded("fstat", (id,), async {
                    let metadata = handles.file_mut(&handle)?.stat().await?;
                    Ok(FileAttrs::from_metadata(&metadata))
                })
                .await;
                attrs_response(id, reply)
            }
            Request::Opendir { id, path } => {
                if let Err(e) = self.handles.ensure_capacity() {
                    return self.refuse_open(id, "OPENDIR", &path, e);
                }
                match self.server.list_folder(&path).await {
                    Ok(entries) => {
                        let folder = FolderHandle::new(PathBuf::from(path), entries);
                        self.register(id, OpenHandle::Folder(folder))
                    }
                    Err(code) => Response::status(id, code),
                }
            }
            Request::Readdir { id, handle } => {
                let handles = &mut self.handles;
                let reply = guarded("readdir", (id,), async {
                    Ok(handles.folder_mut(&handle)?.next_chunk())
                })
                .await;
                match reply {
                    Ok(Some(entries)) => Response::Name { id, entries },
                    Ok(None) => Response::status(id, StatusCode::Eof),
                    Err(code) => Response::status(id, code),
                }
            }
            Request::Stat { id, path } => {
                attrs_response(id, self.server.stat(&path).await.map(|r| r.attrs))
            }
            Request::Lstat { id, path } => {
                attrs_response(id, self.server.lstat(&path).await.map(|r| r.attrs))
            }
            Request::Mkdir { id, path, attrs } => {
                status_response(id, self.server.mkdir(&path, &attrs).await)
            }
            Request::Rmdir { id, path } => status_response(id, self.server.rmdir(&path).await),
            Request::Realpath { id, path } => match self.server.canonicalize(&path).await {
                Ok(filename) => Response::Name {
                    id,
                    entries: vec![AttributeRecord {
                        filename,
                        attrs: FileAttrs::default(),
                    }],
                },
                Err(code) => Response::status(id, code),
            },
            Request::Unsupported { id, kind } => {
                warn!(request_id = id, message_type = kind, "Unimplemented message type");
                let error = Error::NotSupported(format!("message type {kind}"));
                Response::status(id, translate(&error))
            }
            // INIT never reaches here; handle_packet consumes it
            Request::Init { .. } => Response::status(0, StatusCode::BadMessage),
        }
    }

    fn register(&mut self, id: u32, handle: OpenHandle) -> Response {
        match self.handles.insert(handle) {
            Ok(handle) => Response::Handle { id, handle },
            Err(e) => Response::status(id, translate(&e)),
        }
    }

    /// Refuse an OPEN or OPENDIR before touching the filesystem
    ///
    /// NIST 800-53: AU-2 (Audit Events), SC-5 (Denial of Service Protection)
    fn refuse_open(&self, id: u32, operation: &str, path: &str, error: Error) -> Response {
        let status = translate(&error);
        if self.audit_enabled {
            let outcome: Result<()> = Err(error);
            let event = if operation == "OPENDIR" {
                AuditEvent::directory_operation(operation, path, &outcome)
            } else {
                AuditEvent::file_operation(operation, path, None, &outcome)
            };
            event.log();
        }
        Response::status(id, status)
    }

    async fn close_handle(&mut self, handle_id: &[u8]) -> Result<()> {
        match self.handles.remove(handle_id)? {
            OpenHandle::File(mut file) => {
                let outcome = file.close().await;
                if self.audit_enabled {
                    AuditEvent::file_operation(
                        "CLOSE",
                        &file.path().display().to_string(),
                        Some(file.bytes_transferred()),
                        &outcome,
                    )
                    .log();
                }
                outcome
            }
            OpenHandle::Folder(_) => Ok(()),
        }
    }

    /// Release every open handle and notify the server, returning the count
    pub async fn finish(&mut self) -> usize {
        let closed = self.handles.close_all().await;
        if closed > 0 {
            info!("Cleaning up {} open file handles on session end", closed);
        }
        self.server.session_ended(closed).await;
        closed
    }

    /// Serve packets until the transport reaches end of input
    ///
    /// Does not release handles; call [`Session::finish`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on transport failure (including an oversized
    /// frame) and [`Error::Protocol`] when the client breaks the handshake.
    pub async fn run<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let inbound_limit = self.max_packet_size.saturating_add(HEADER_ALLOWANCE);
        let mut packets = LengthDelimitedCodec::builder()
            .max_frame_length(inbound_limit as usize)
            .new_read(reader);
        // Replies are sized by the server (a full READDIR chunk can outgrow
        // the inbound limit), so only the inbound side is bounded
        let mut responses = LengthDelimitedCodec::builder()
            .max_frame_length(usize::MAX)
            .new_write(writer);

        while let Some(packet) = packets.next().await {
            let packet = packet?;
            let response = self.handle_packet(&packet).await?;
            responses.send(response.encode().freeze()).await?;
        }

        debug!("Client closed the SFTP stream");
        Ok(())
    }
}

fn status_response(id: u32, reply: Reply<()>) -> Response {
    Response::status(id, reply.err().unwrap_or(StatusCode::Ok))
}

fn attrs_response(id: u32, reply: Reply<FileAttrs>) -> Response {
    match reply {
        Ok(attrs) => Response::Attrs { id, attrs },
        Err(code) => Response::status(id, code),
    }
}

/// Serve one SFTP session on a byte stream, confined to `config.root_dir`
///
/// # Errors
///
/// Returns [`Error::Config`] if the root is unusable, otherwise whatever
/// ended the session abnormally. Handles are released in every case.
pub async fn serve<R, W>(config: &Config, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let server = SftpDispatcher::new(&config.root_dir)
        .await?
        .with_audit(config.logging.audit_enabled);
    let mut session = Session::new(server, config);

    let result = session.run(reader, writer).await;
    session.finish().await;

    if let Err(ref e) = result {
        error!(error = %e, "SFTP session ended with error");
    }
    result
}
