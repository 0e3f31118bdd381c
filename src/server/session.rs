//! One client session on the server.
//!
//! ```text
//! AWAIT_HANDSHAKE --handshake--> SERVING --exit/unknown/error--> CLOSING --> CLOSED
//! ```
//!
//! The session owns its stream halves and deadline; every exit path goes
//! through `close`, and dropping the session closes the socket.

use crate::error::{Result, SyncError};
use crate::protocol::wire::put_string_list;
use crate::protocol::{
    negotiate_version, read_string, send, BinaryAnswer, FileOffer, Handshake, HandshakeReply,
    MessageKind, UnknownMessage, VersionNegotiationResult, HANDSHAKE, PROTOCOL_VERSION,
};
use crate::server::timeout::{Phase, TimeoutGuard};
use crate::server::ServerContext;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::time;
use tracing::{debug, info, warn};

/// Reported back in place of a token that could not be decoded
const MALFORMED_TOKEN: &str = "<malformed>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitHandshake,
    Serving,
    Closing,
    Closed,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent EXIT
    Exit,
    /// Token outside the vocabulary (or before the handshake)
    UnknownMessage(String),
    /// Handshake refused over an incompatible version
    Rejected,
    /// Client went away without EXIT
    Disconnected,
    /// Deadline passed
    TimedOut,
}

pub struct Session<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    peer: String,
    ctx: Arc<ServerContext>,
    guard: TimeoutGuard,
    state: SessionState,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, peer: impl Into<String>, ctx: Arc<ServerContext>) -> Self {
        let guard = TimeoutGuard::new(ctx.idle_timeout, ctx.transfer_timeout);
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer: peer.into(),
            ctx,
            guard,
            state: SessionState::AwaitHandshake,
        }
    }

    /// Drive the session to completion.
    ///
    /// Disconnects and timeouts are ordinary endings; anything returned as
    /// `Err` is an unexpected failure (server-side file error, malformed
    /// input). Resources are released either way.
    pub async fn run(mut self) -> Result<SessionEnd> {
        let result = self.drive().await;
        self.close().await;

        match result {
            Err(SyncError::Timeout(after)) => {
                info!("Client {} timed out after {:?}, closing", self.peer, after);
                Ok(SessionEnd::TimedOut)
            }
            Err(e) if e.is_disconnect() => {
                info!("Client {} disconnected", self.peer);
                Ok(SessionEnd::Disconnected)
            }
            other => other,
        }
    }

    async fn drive(&mut self) -> Result<SessionEnd> {
        let end = loop {
            let ended = if self.state == SessionState::AwaitHandshake {
                self.await_handshake().await?
            } else {
                self.serve_command().await?
            };
            if let Some(end) = ended {
                break end;
            }
        };
        self.state = SessionState::Closing;
        Ok(end)
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;
        self.guard.cancel();
        // Bounded so a peer that stopped reading can't pin the task
        let limit = self.guard.duration(Phase::Idle);
        if let Ok(Err(e)) = time::timeout(limit, self.writer.shutdown()).await {
            debug!("Shutdown of {} failed: {}", self.peer, e);
        }
        self.state = SessionState::Closed;
        debug!("Closed connection with {}", self.peer);
    }

    async fn await_handshake(&mut self) -> Result<Option<SessionEnd>> {
        self.guard.arm_idle();
        let token = self.read_token().await?;
        if token != HANDSHAKE {
            return self.reject_unknown(token).await.map(Some);
        }
        self.answer_handshake().await
    }

    async fn answer_handshake(&mut self) -> Result<Option<SessionEnd>> {
        let hello = self.guard.run(Handshake::read_body(&mut self.reader)).await?;
        self.guard.arm_idle();

        let reply = match negotiate_version(hello.version) {
            VersionNegotiationResult::Supported(_) => HandshakeReply::Accepted {
                version: PROTOCOL_VERSION,
                vocabulary: self.ctx.vocabulary.clone(),
            },
            VersionNegotiationResult::TooOld {
                client,
                min_supported,
            } => HandshakeReply::Rejected {
                reason: format!(
                    "Client protocol v{client} is too old, server requires at least v{min_supported}"
                ),
            },
            VersionNegotiationResult::TooNew {
                client,
                max_supported,
            } => HandshakeReply::Rejected {
                reason: format!(
                    "Client protocol v{client} is newer than server maximum v{max_supported}"
                ),
            },
        };

        let buf = reply.encode()?;
        self.guard.run(send(&mut self.writer, &buf)).await?;

        if let HandshakeReply::Rejected { reason } = reply {
            warn!("Refused {}: {}", self.peer, reason);
            return Ok(Some(SessionEnd::Rejected));
        }

        debug!("Sent vocabulary to {}", self.peer);
        self.state = SessionState::Serving;
        Ok(None)
    }

    /// Next command token. Undecodable tokens come back as a placeholder so
    /// they are rejected like any other unknown message.
    async fn read_token(&mut self) -> Result<String> {
        match self.guard.run(read_string(&mut self.reader)).await {
            Err(SyncError::Protocol(reason)) => {
                warn!("Malformed token from {}: {}", self.peer, reason);
                Ok(MALFORMED_TOKEN.to_string())
            }
            other => other,
        }
    }

    async fn reject_unknown(&mut self, token: String) -> Result<SessionEnd> {
        warn!("Unknown message {:?} from {}, closing", token, self.peer);
        let buf = UnknownMessage {
            token: token.clone(),
        }
        .encode()?;
        self.guard.run(send(&mut self.writer, &buf)).await?;
        Ok(SessionEnd::UnknownMessage(token))
    }

    async fn serve_command(&mut self) -> Result<Option<SessionEnd>> {
        self.guard.arm_idle();
        let token = self.read_token().await?;
        self.guard.arm_idle();

        let Some(kind) = self.ctx.vocabulary.lookup(&token) else {
            return self.reject_unknown(token).await.map(Some);
        };
        debug!("Received {} from {}", kind.name(), self.peer);

        match kind {
            MessageKind::Handshake => return self.answer_handshake().await,
            MessageKind::GetManagedDirectories => {
                let mut buf = BytesMut::new();
                put_string_list(&mut buf, self.ctx.index.directories())?;
                self.guard.run(send(&mut self.writer, &buf)).await?;
            }
            MessageKind::GetNumberOfManagedFiles => {
                let count = i32::try_from(self.ctx.index.len()).unwrap_or(i32::MAX);
                self.guard
                    .run(send(&mut self.writer, &count.to_be_bytes()))
                    .await?;
            }
            MessageKind::SyncFiles => self.sync_files().await?,
            MessageKind::Exit => {
                info!("Client {} requested exit, sync complete", self.peer);
                return Ok(Some(SessionEnd::Exit));
            }
        }
        Ok(None)
    }

    /// Offer every index record in turn; stream the file whenever the client says no.
    async fn sync_files(&mut self) -> Result<()> {
        let index = Arc::clone(&self.ctx.index);
        let mut sent = 0usize;

        for (path, hash) in index.files() {
            self.guard.arm_idle();
            let offer = FileOffer {
                path: path.clone(),
                hash: hash.clone(),
            }
            .encode()?;
            self.guard.run(send(&mut self.writer, &offer)).await?;

            let answer = self.guard.run(BinaryAnswer::read(&mut self.reader)).await?;
            if answer == BinaryAnswer::No {
                self.transfer_file(path).await?;
                sent += 1;
            }
        }

        self.guard.arm_idle();
        self.guard
            .run(send(&mut self.writer, &FileOffer::encode_end()))
            .await?;
        info!(
            "Offered {} files to {}, sent {}",
            index.len(),
            self.peer,
            sent
        );
        Ok(())
    }

    async fn transfer_file(&mut self, path: &str) -> Result<()> {
        self.guard.arm_transfer();

        let full_path = self.ctx.root.join(path);
        let mut file = File::open(&full_path)
            .await
            .map_err(|e| SyncError::filesystem(&full_path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| SyncError::filesystem(&full_path, e))?
            .len();

        debug!("Writing {} ({} bytes) to {}", path, size, self.peer);
        let writer = &mut self.writer;
        self.guard
            .run(async move {
                writer.write_i64(size as i64).await?;
                writer.flush().await?;

                let mut body = (&mut file).take(size);
                let copied = tokio::io::copy(&mut body, &mut *writer).await?;
                if copied != size {
                    return Err(SyncError::Transfer {
                        path: path.to_string(),
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("file shrank to {copied} of {size} bytes while sending"),
                        ),
                    });
                }
                writer.flush().await?;
                Ok::<(), SyncError>(())
            })
            .await?;

        info!("Finished writing {} to {}", path, self.peer);
        Ok(())
    }
}
