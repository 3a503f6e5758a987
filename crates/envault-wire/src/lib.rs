//! Length-prefixed binary wire codec for the envault protocol.
//!
//! Every peer pair (client↔server, server↔HSM, server↔store) frames its
//! traffic with the primitives in this crate, over any ordered, reliable
//! byte stream. Each primitive is self-framing, so peers never need
//! out-of-band length information.
//!
//! Wire formats:
//! - integers: fixed width, little-endian
//! - boolean: one byte, `0` = false, nonzero = true
//! - string: `i32` byte length followed by that many UTF-8 bytes
//! - byte sequence: `i32` length; `-1` marks an absent sequence, which is
//!   distinct from a present zero-length one
//!
//! The codec carries no command semantics. Command words are plain strings
//! written with [`write_string`]; interpretation belongs to the dispatcher
//! on each service.
//!
//! # Errors
//!
//! A negative length prefix (other than the `-1` absence marker for byte
//! sequences) is a [`WireError::MalformedFrame`] and must abort the
//! connection. Reaching end-of-stream before a declared length is satisfied
//! is [`WireError::ConnectionClosed`], never a silently truncated value.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single length-prefixed element (64 MiB).
///
/// A hostile peer can claim any length up to `i32::MAX`; this cap bounds
/// the allocation a single frame element can force.
pub const MAX_ELEMENT_LEN: usize = 64 * 1024 * 1024;

/// Codec-level errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the stream before a declared length was satisfied.
    ///
    /// Fatal to the connection. Callers must treat this as session end,
    /// not as a valid empty result.
    #[error("connection closed mid-frame")]
    ConnectionClosed,

    /// A length prefix or encoded value violated the framing contract.
    ///
    /// Fatal to the connection.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Underlying transport I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Codec result alias.
pub type Result<T> = std::result::Result<T, WireError>;

/// Write a boolean as a single byte.
pub async fn write_bool<W: AsyncWrite + Unpin>(stream: &mut W, value: bool) -> Result<()> {
    stream.write_all(&[u8::from(value)]).await?;
    Ok(())
}

/// Read a boolean; any nonzero byte is `true`.
pub async fn read_bool<R: AsyncRead + Unpin>(stream: &mut R) -> Result<bool> {
    let mut buf = [0u8; 1];
    read_exactly(stream, &mut buf).await?;
    Ok(buf[0] != 0)
}

/// Write a little-endian `i32`.
pub async fn write_i32<W: AsyncWrite + Unpin>(stream: &mut W, value: i32) -> Result<()> {
    stream.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a little-endian `i32`.
pub async fn read_i32<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exactly(stream, &mut buf).await?;
    Ok(i32::from_le_bytes(buf))
}

/// Write a little-endian `i64`.
pub async fn write_i64<W: AsyncWrite + Unpin>(stream: &mut W, value: i64) -> Result<()> {
    stream.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a little-endian `i64`.
pub async fn read_i64<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    read_exactly(stream, &mut buf).await?;
    Ok(i64::from_le_bytes(buf))
}

/// Write a length-prefixed UTF-8 string.
pub async fn write_string<W: AsyncWrite + Unpin>(stream: &mut W, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len =
        i32::try_from(bytes.len()).map_err(|_| WireError::MalformedFrame("string too long"))?;
    write_i32(stream, len).await?;
    stream.write_all(bytes).await?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
///
/// A negative length prefix or invalid UTF-8 payload is a protocol
/// violation.
pub async fn read_string<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    let len = read_i32(stream).await?;
    if len < 0 {
        return Err(WireError::MalformedFrame("negative string length"));
    }
    let buf = read_len_prefixed(stream, len as usize).await?;
    String::from_utf8(buf).map_err(|_| WireError::MalformedFrame("string is not valid UTF-8"))
}

/// Write a nullable byte sequence.
///
/// `None` is encoded as length `-1`, distinct from `Some(&[])` which is
/// encoded as length `0`.
pub async fn write_bytes<W: AsyncWrite + Unpin>(
    stream: &mut W,
    value: Option<&[u8]>,
) -> Result<()> {
    let Some(bytes) = value else {
        return write_i32(stream, -1).await;
    };
    let len =
        i32::try_from(bytes.len()).map_err(|_| WireError::MalformedFrame("byte sequence too long"))?;
    write_i32(stream, len).await?;
    stream.write_all(bytes).await?;
    Ok(())
}

/// Read a nullable byte sequence.
///
/// Length `-1` yields `None`; any other negative length is a protocol
/// violation.
pub async fn read_bytes<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let len = read_i32(stream).await?;
    if len == -1 {
        return Ok(None);
    }
    if len < -1 {
        return Err(WireError::MalformedFrame("negative byte sequence length"));
    }
    Ok(Some(read_len_prefixed(stream, len as usize).await?))
}

/// Read a byte sequence that the protocol requires to be present.
pub async fn read_required_bytes<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    read_bytes(stream)
        .await?
        .ok_or(WireError::MalformedFrame("required byte sequence is absent"))
}

async fn read_len_prefixed<R: AsyncRead + Unpin>(stream: &mut R, len: usize) -> Result<Vec<u8>> {
    if len > MAX_ELEMENT_LEN {
        return Err(WireError::MalformedFrame("length prefix exceeds element limit"));
    }
    let mut buf = vec![0u8; len];
    read_exactly(stream, &mut buf).await?;
    Ok(buf)
}

/// `read_exact` with EOF mapped to [`WireError::ConnectionClosed`].
async fn read_exactly<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WireError::ConnectionClosed
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(())
}
