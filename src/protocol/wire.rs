//! Wire primitives.
//!
//! Nothing on the wire is self-describing: each step of the conversation
//! knows which fields come next and in what order.
//!
//! Wire format: all multi-byte integers are big-endian.
//! Strings are length-prefixed (u16 len + UTF-8). Booleans are one byte.
//! Lists are a u32 count followed by that many items.

use crate::error::{Result, SyncError};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest string that fits the u16 length prefix
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Upper bound on list counts, prevents huge allocations from a corrupt peer
pub const MAX_LIST_LEN: u32 = 1 << 20;

// =============================================================================
// Encoding
// =============================================================================

pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(SyncError::Protocol(format!(
            "String of {} bytes exceeds maximum {}",
            bytes.len(),
            MAX_STRING_LEN
        )));
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn put_string_list(buf: &mut BytesMut, items: &[String]) -> Result<()> {
    buf.put_u32(items.len() as u32);
    for item in items {
        put_string(buf, item)?;
    }
    Ok(())
}

/// Write a pre-encoded buffer and flush it to the peer.
pub async fn send<W: AsyncWrite + Unpin>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf).await?;
    w.flush().await?;
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = r.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes).await?;
    String::from_utf8(bytes)
        .map_err(|_| SyncError::Protocol("Invalid UTF-8 in string field".to_string()))
}

pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    match r.read_u8().await? {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(SyncError::Protocol(format!("Invalid boolean byte {b:#04x}"))),
    }
}

pub async fn read_string_list<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<String>> {
    let count = r.read_u32().await?;
    if count > MAX_LIST_LEN {
        return Err(SyncError::Protocol(format!(
            "List of {count} items exceeds maximum {MAX_LIST_LEN}"
        )));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(read_string(r).await?);
    }
    Ok(items)
}
