//! Client side of a session: connect, handshake, and typed requests.

use crate::error::{Result, SyncError};
use crate::protocol::wire::put_string;
use crate::protocol::{
    read_directories, send, BinaryAnswer, FileOffer, Handshake, HandshakeReply, MessageKind,
    Vocabulary,
};
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

pub struct ServerConnection<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    vocabulary: Vocabulary,
    server_version: u16,
}

impl ServerConnection<OwnedReadHalf, OwnedWriteHalf> {
    /// Open a TCP connection to `addr` (`host:port`) and perform the handshake.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        debug!("Connecting to {}", addr);
        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SyncError::Connection {
                    addr: addr.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(SyncError::Connection {
                    addr: addr.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no answer within {timeout:?}"),
                    ),
                })
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Self::handshake(reader, writer).await
    }
}

impl<R, W> ServerConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Exchange the handshake over an already established stream.
    ///
    /// Fails with `UnsupportedVersion` when the server refuses us or its
    /// vocabulary differs from ours.
    pub async fn handshake(reader: R, writer: W) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        send(&mut writer, &Handshake::new().encode()?).await?;

        match HandshakeReply::read(&mut reader).await? {
            HandshakeReply::Accepted {
                version,
                vocabulary,
            } => {
                if vocabulary != Vocabulary::current() {
                    return Err(SyncError::UnsupportedVersion(format!(
                        "server protocol v{version} uses an incompatible vocabulary"
                    )));
                }
                debug!("Handshake complete, server protocol v{}", version);
                Ok(Self {
                    reader,
                    writer,
                    vocabulary,
                    server_version: version,
                })
            }
            HandshakeReply::Rejected { reason } => Err(SyncError::UnsupportedVersion(reason)),
        }
    }

    pub fn server_version(&self) -> u16 {
        self.server_version
    }

    async fn request(&mut self, kind: MessageKind) -> Result<()> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, self.vocabulary.token(kind))?;
        send(&mut self.writer, &buf).await
    }

    pub async fn fetch_managed_directories(&mut self) -> Result<Vec<String>> {
        debug!("Fetching managed directories from server");
        self.request(MessageKind::GetManagedDirectories).await?;
        read_directories(&mut self.reader).await
    }

    pub async fn fetch_file_count(&mut self) -> Result<usize> {
        debug!("Fetching number of managed files from server");
        self.request(MessageKind::GetNumberOfManagedFiles).await?;
        let count = self.reader.read_i32().await?;
        usize::try_from(count)
            .map_err(|_| SyncError::Protocol(format!("Negative file count {count}")))
    }

    /// Start a SYNC_FILES exchange; follow with `next_offer` until `None`.
    pub async fn begin_sync(&mut self) -> Result<()> {
        self.request(MessageKind::SyncFiles).await
    }

    pub async fn next_offer(&mut self) -> Result<Option<FileOffer>> {
        FileOffer::read_next(&mut self.reader).await
    }

    pub async fn answer(&mut self, answer: BinaryAnswer) -> Result<()> {
        answer.write(&mut self.writer).await
    }

    /// Length announced ahead of a file body.
    pub async fn read_length(&mut self) -> Result<u64> {
        let length = self.reader.read_i64().await?;
        u64::try_from(length)
            .map_err(|_| SyncError::Protocol(format!("Negative file length {length}")))
    }

    /// Raw stream for reading a file body of a previously announced length.
    pub fn body_reader(&mut self) -> &mut BufReader<R> {
        &mut self.reader
    }

    /// Ask the server to end the session and close our side.
    pub async fn exit(&mut self) -> Result<()> {
        debug!("Sending exit to server");
        self.request(MessageKind::Exit).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
