//! The wire protocol shared by all three server tiers.
//!
//! A single duplex TCP connection carries two framed primitives:
//!
//! 1. **Message frame**: a 4-byte unsigned big-endian length `N`, followed by
//!    `N` bytes of UTF-8 JSON.
//! 2. **File frame**: an 8-byte unsigned big-endian length `N`, followed by
//!    exactly `N` bytes of opaque content.
//!
//! Frames are read and written as exact-length operations (`read_exact` /
//! `write_all` already loop internally, so a short read never silently
//! truncates a frame). A corrupt or truncated frame terminates the
//! connection; this crate surfaces that as [`WireError`] and leaves closing
//! the socket to the caller.
//!
//! This crate only knows about framing. Tier-specific request/response
//! vocabulary (actions, collections, error tags) lives in the crate for that
//! tier.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest message frame we are willing to allocate for. Prevents a peer
/// from claiming a multi-gigabyte JSON body and exhausting memory before we
/// even look at it.
pub const MAX_MESSAGE_LEN: u32 = 16 * 1024 * 1024;

/// Largest file frame we are willing to receive in one shot. Generous for
/// game packages, but still bounded.
pub const MAX_FILE_LEN: u64 = 4 * 1024 * 1024 * 1024;

/// Chunk size used when streaming file frames, so we never hold an entire
/// package in memory twice over.
pub const FILE_CHUNK_SIZE: usize = 8192;

/// Errors that terminate a connection. None of these are recoverable mid
/// conversation; the caller should drop the socket.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("message frame of {len} bytes exceeds the {max} byte limit")]
    OversizeMessage { len: u32, max: u32 },

    #[error("file frame of {len} bytes exceeds the {max} byte limit")]
    OversizeFile { len: u64, max: u64 },

    #[error("invalid JSON in message frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("peer closed the connection")]
    Closed,
}

impl WireError {
    /// The tag used on the wire / in logs, matching the taxonomy in the
    /// platform spec (`TransportError`).
    pub fn tag(&self) -> &'static str {
        "TransportError"
    }
}

/// Reads one length-prefixed JSON message frame and deserializes it as `T`.
///
/// Returns [`WireError::Closed`] if the peer closed the connection cleanly
/// before sending the 4-byte length header (the expected way a connection
/// ends between requests).
pub async fn read_message<T, R>(reader: &mut R) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_LEN {
        return Err(WireError::OversizeMessage {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let value = serde_json::from_slice(&body)?;
    Ok(value)
}

/// Serializes `value` as JSON and writes it as a length-prefixed message
/// frame.
pub async fn write_message<T, W>(writer: &mut W, value: &T) -> Result<(), WireError>
where
    T: Serialize + ?Sized,
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_MESSAGE_LEN as usize {
        return Err(WireError::OversizeMessage {
            len: body.len() as u32,
            max: MAX_MESSAGE_LEN,
        });
    }
    let len = (body.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the 8-byte length header of a file frame and returns it without
/// consuming the payload. Callers stream the payload themselves with
/// [`copy_file_payload`] so they can write directly to disk.
pub async fn read_file_len<R>(reader: &mut R) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 8];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u64::from_be_bytes(len_buf);
    if len > MAX_FILE_LEN {
        return Err(WireError::OversizeFile {
            len,
            max: MAX_FILE_LEN,
        });
    }
    Ok(len)
}

/// Streams exactly `len` bytes from `reader` into `writer`, in
/// [`FILE_CHUNK_SIZE`] chunks, so a single file frame never needs to be
/// buffered whole.
pub async fn copy_file_payload<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<(), WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;
    let mut buf = [0u8; FILE_CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(FILE_CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..want]).await?;
        writer.write_all(&buf[..want]).await?;
        remaining -= want as u64;
    }
    Ok(())
}

/// Writes an 8-byte length header followed by `len` bytes streamed from
/// `reader`, in [`FILE_CHUNK_SIZE`] chunks.
pub async fn write_file_frame<R, W>(writer: &mut W, reader: &mut R, len: u64) -> Result<(), WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&len.to_be_bytes()).await?;
    copy_file_payload(reader, writer, len).await?;
    writer.flush().await?;
    Ok(())
}

/// Convenience wrapper combining [`read_file_len`] and [`copy_file_payload`]
/// for the common case of writing the payload straight to an in-memory
/// buffer.
pub async fn read_file_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = read_file_len(reader).await?;
    let mut body = Vec::with_capacity(len as usize);
    let mut remaining = len;
    let mut buf = [0u8; FILE_CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(FILE_CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..want]).await?;
        body.extend_from_slice(&buf[..want]);
        remaining -= want as u64;
    }
    Ok(body)
}

/// The envelope every tier's response carries, per the spec's "every
/// response carries `success`" requirement. Tiers embed this via
/// `#[serde(flatten)]` alongside their own extra fields.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultEnvelope {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
        }
    }

    pub fn err(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(tag.into()),
            message: Some(message.into()),
        }
    }
}
