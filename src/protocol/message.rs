//! Message vocabulary, handshake and composite messages.
//!
//! The vocabulary is fixed at compile time. The server still sends it during
//! the handshake so the client can refuse to talk to a server whose tokens
//! differ from its own.

use crate::error::{Result, SyncError};
use crate::protocol::wire::{
    put_bool, put_string, read_bool, read_string, read_string_list, send, MAX_LIST_LEN,
};
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Literal that opens every session, independent of protocol version
pub const HANDSHAKE: &str = "HANDSHAKE";

/// Indication sent before the server drops a session over an unknown token
pub const UNKNOWN_MESSAGE: &str = "UNKNOWN_MESSAGE";

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Minimum supported protocol version
pub const PROTOCOL_VERSION_MIN: u16 = 1;

/// Maximum supported protocol version
pub const PROTOCOL_VERSION_MAX: u16 = 1;

// =============================================================================
// Message Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    Handshake,
    SyncFiles,
    GetManagedDirectories,
    GetNumberOfManagedFiles,
    Exit,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        Self::Handshake,
        Self::SyncFiles,
        Self::GetManagedDirectories,
        Self::GetNumberOfManagedFiles,
        Self::Exit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::SyncFiles => "SYNC_FILES",
            Self::GetManagedDirectories => "GET_MANAGED_DIRECTORIES",
            Self::GetNumberOfManagedFiles => "GET_NUMBER_OF_MANAGED_FILES",
            Self::Exit => "EXIT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Token for this kind in protocol v1.
    fn token_v1(self) -> &'static str {
        match self {
            Self::Handshake => HANDSHAKE,
            Self::SyncFiles => "SYNC",
            Self::GetManagedDirectories => "DIRS",
            Self::GetNumberOfManagedFiles => "COUNT",
            Self::Exit => "EXIT",
        }
    }
}

// =============================================================================
// Vocabulary
// =============================================================================

/// Mapping from message kind to wire token, identical on both peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: BTreeMap<MessageKind, String>,
}

impl Vocabulary {
    pub fn current() -> Self {
        Self {
            tokens: MessageKind::ALL
                .into_iter()
                .map(|kind| (kind, kind.token_v1().to_string()))
                .collect(),
        }
    }

    pub fn token(&self, kind: MessageKind) -> &str {
        self.tokens
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.token_v1())
    }

    /// Resolve an inbound token. `None` means the token is outside the vocabulary.
    pub fn lookup(&self, token: &str) -> Option<MessageKind> {
        self.tokens
            .iter()
            .find(|(_, t)| t.as_str() == token)
            .map(|(kind, _)| *kind)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.tokens.len() as u32);
        for (kind, token) in &self.tokens {
            put_string(buf, kind.name())?;
            put_string(buf, token)?;
        }
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let count = r.read_u32().await?;
        if count > MAX_LIST_LEN {
            return Err(SyncError::Protocol(format!(
                "Vocabulary of {count} entries exceeds maximum"
            )));
        }
        let mut tokens = BTreeMap::new();
        for _ in 0..count {
            let name = read_string(r).await?;
            let token = read_string(r).await?;
            let kind = MessageKind::from_name(&name).ok_or_else(|| {
                SyncError::UnsupportedVersion(format!("Unknown message kind {name} in vocabulary"))
            })?;
            if tokens.values().any(|t| t == &token) {
                return Err(SyncError::Protocol(format!(
                    "Token {token} assigned to more than one message kind"
                )));
            }
            tokens.insert(kind, token);
        }
        Ok(Self { tokens })
    }
}

// =============================================================================
// Version Negotiation
// =============================================================================

/// Result of version negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionNegotiationResult {
    /// Version is supported
    Supported(u16),
    /// Version is too old (client needs upgrade)
    TooOld { client: u16, min_supported: u16 },
    /// Version is too new (server needs upgrade)
    TooNew { client: u16, max_supported: u16 },
}

/// Check if a client protocol version is supported.
pub fn negotiate_version(client_version: u16) -> VersionNegotiationResult {
    if client_version < PROTOCOL_VERSION_MIN {
        VersionNegotiationResult::TooOld {
            client: client_version,
            min_supported: PROTOCOL_VERSION_MIN,
        }
    } else if client_version > PROTOCOL_VERSION_MAX {
        VersionNegotiationResult::TooNew {
            client: client_version,
            max_supported: PROTOCOL_VERSION_MAX,
        }
    } else {
        VersionNegotiationResult::Supported(client_version)
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u16,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION,
        }
    }

    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(2 + HANDSHAKE.len() + 2);
        put_string(&mut buf, HANDSHAKE)?;
        buf.put_u16(self.version);
        Ok(buf)
    }

    /// Read the fields following the `HANDSHAKE` literal.
    pub async fn read_body<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            version: r.read_u16().await?,
        })
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    Accepted { version: u16, vocabulary: Vocabulary },
    Rejected { reason: String },
}

impl HandshakeReply {
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        match self {
            Self::Accepted {
                version,
                vocabulary,
            } => {
                put_bool(&mut buf, true);
                buf.put_u16(*version);
                vocabulary.encode_into(&mut buf)?;
            }
            Self::Rejected { reason } => {
                put_bool(&mut buf, false);
                put_string(&mut buf, reason)?;
            }
        }
        Ok(buf)
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        if read_bool(r).await? {
            let version = r.read_u16().await?;
            let vocabulary = Vocabulary::read(r).await?;
            Ok(Self::Accepted {
                version,
                vocabulary,
            })
        } else {
            Ok(Self::Rejected {
                reason: read_string(r).await?,
            })
        }
    }
}

// =============================================================================
// UNKNOWN_MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    pub token: String,
}

impl UnknownMessage {
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(4 + UNKNOWN_MESSAGE.len() + self.token.len());
        put_string(&mut buf, UNKNOWN_MESSAGE)?;
        put_string(&mut buf, &self.token)?;
        Ok(buf)
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let marker = read_string(r).await?;
        if marker != UNKNOWN_MESSAGE {
            return Err(SyncError::Protocol(format!(
                "Expected {UNKNOWN_MESSAGE}, got {marker}"
            )));
        }
        Ok(Self {
            token: read_string(r).await?,
        })
    }
}

// =============================================================================
// SYNC_FILES exchange
// =============================================================================

/// Client's reply to a file offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BinaryAnswer {
    No = 0,
    Yes = 1,
}

impl BinaryAnswer {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::No),
            1 => Some(Self::Yes),
            _ => None,
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(self, w: &mut W) -> Result<()> {
        send(w, &(self as i32).to_be_bytes()).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let v = r.read_i32().await?;
        Self::from_i32(v).ok_or_else(|| SyncError::Protocol(format!("Invalid answer {v}")))
    }
}

/// "Do you have this file?" - one record of the server's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub path: String,
    pub hash: String,
}

impl FileOffer {
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(5 + self.path.len() + self.hash.len());
        put_bool(&mut buf, true);
        put_string(&mut buf, &self.path)?;
        put_string(&mut buf, &self.hash)?;
        Ok(buf)
    }

    /// The terminating "no more files" flag.
    pub fn encode_end() -> BytesMut {
        let mut buf = BytesMut::with_capacity(1);
        put_bool(&mut buf, false);
        buf
    }

    /// Read the next offer, `None` once the server signals the end.
    pub async fn read_next<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Self>> {
        if !read_bool(r).await? {
            return Ok(None);
        }
        let path = read_string(r).await?;
        let hash = read_string(r).await?;
        Ok(Some(Self { path, hash }))
    }
}

/// Read a directory list reply.
pub async fn read_directories<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<String>> {
    read_string_list(r).await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_pairwise_distinct() {
        let vocab = Vocabulary::current();
        let tokens: HashSet<&str> = MessageKind::ALL.iter().map(|k| vocab.token(*k)).collect();
        assert_eq!(tokens.len(), MessageKind::ALL.len());
        assert_eq!(vocab.len(), MessageKind::ALL.len());
    }

    #[test]
    fn test_lookup() {
        let vocab = Vocabulary::current();
        for kind in MessageKind::ALL {
            assert_eq!(vocab.lookup(vocab.token(kind)), Some(kind));
        }
        assert_eq!(vocab.lookup("DELETE_EVERYTHING"), None);
        assert_eq!(vocab.token(MessageKind::Handshake), HANDSHAKE);
    }

    #[tokio::test]
    async fn test_handshake_reply_carries_vocabulary() {
        let reply = HandshakeReply::Accepted {
            version: PROTOCOL_VERSION,
            vocabulary: Vocabulary::current(),
        };
        let buf = reply.encode().unwrap();
        let mut reader = &buf[..];
        assert_eq!(HandshakeReply::read(&mut reader).await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        put_string(&mut buf, "SYNC_FILES").unwrap();
        put_string(&mut buf, "X").unwrap();
        put_string(&mut buf, "EXIT").unwrap();
        put_string(&mut buf, "X").unwrap();
        let mut reader = &buf[..];
        assert!(matches!(
            Vocabulary::read(&mut reader).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_in_vocabulary() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        put_string(&mut buf, "UPLOAD_FILES").unwrap();
        put_string(&mut buf, "UP").unwrap();
        let mut reader = &buf[..];
        assert!(matches!(
            Vocabulary::read(&mut reader).await,
            Err(SyncError::UnsupportedVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_stream_terminates() {
        let mut buf = FileOffer {
            path: "mods/a.jar".to_string(),
            hash: "H1".to_string(),
        }
        .encode()
        .unwrap();
        buf.extend_from_slice(&FileOffer::encode_end());

        let mut reader = &buf[..];
        let first = FileOffer::read_next(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.path, "mods/a.jar");
        assert_eq!(first.hash, "H1");
        assert!(FileOffer::read_next(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn test_binary_answer_from_i32() {
        assert_eq!(BinaryAnswer::from_i32(0), Some(BinaryAnswer::No));
        assert_eq!(BinaryAnswer::from_i32(1), Some(BinaryAnswer::Yes));
        assert_eq!(BinaryAnswer::from_i32(2), None);
    }

    #[test]
    fn test_version_negotiation_supported() {
        assert_eq!(
            negotiate_version(PROTOCOL_VERSION),
            VersionNegotiationResult::Supported(PROTOCOL_VERSION)
        );
    }

    #[test]
    fn test_version_negotiation_too_new() {
        assert_eq!(
            negotiate_version(PROTOCOL_VERSION_MAX + 1),
            VersionNegotiationResult::TooNew {
                client: PROTOCOL_VERSION_MAX + 1,
                max_supported: PROTOCOL_VERSION_MAX,
            }
        );
    }

    #[test]
    fn test_version_negotiation_too_old() {
        assert_eq!(
            negotiate_version(0),
            VersionNegotiationResult::TooOld {
                client: 0,
                min_supported: PROTOCOL_VERSION_MIN,
            }
        );
    }
}
