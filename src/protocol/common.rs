//! Stream typedefs, wire limits and field-level framing primitives
// (c) 2025 Ross Younger
//!
//! # On-Wire Framing
//!
//! Every protocol message is a single self-delimiting frame:
//! a 1-byte type tag followed by length-prefixed fields.
//! All integers are big-endian; all strings are UTF-8.
//!
//! Length fields are checked against per-field limits on both encode and
//! decode, so a malformed or malicious peer cannot make us allocate
//! unbounded memory.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/////////////////////////////////////////////////////////////////////////////////////////////
// STREAM TYPEDEFS

/// Marker trait for streams used for sending data
pub trait SendingStream: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin> SendingStream for T {}

/// Marker trait for streams used for receiving data
pub trait ReceivingStream: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> ReceivingStream for T {}

/// Syntactic sugar helper type
#[derive(Debug)]
pub struct SendReceivePair<S: SendingStream, R: ReceivingStream> {
    /// outbound data
    pub send: S,
    /// inbound data
    pub recv: R,
}

impl<S: SendingStream, R: ReceivingStream> From<(S, R)> for SendReceivePair<S, R> {
    fn from(value: (S, R)) -> Self {
        Self {
            send: value.0,
            recv: value.1,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// WIRE LIMITS

/// Longest permitted text message body, in bytes
pub const MAX_TEXT_BYTES: usize = 1_048_576;
/// Longest permitted filename, in bytes
pub const MAX_FILENAME_BYTES: usize = 1024;
/// Largest permitted file payload, in bytes.
/// Files travel as a single frame held fully in memory, so this is also
/// an allocation bound.
pub const MAX_FILE_BYTES: usize = 64 * 1_048_576;
/// Longest permitted control notice, in bytes
pub const MAX_CONTROL_BYTES: usize = 4096;

/////////////////////////////////////////////////////////////////////////////////////////////
// ERRORS

/// Things that can go wrong when encoding or decoding a frame.
///
/// A clean end of stream _before_ a frame starts is not an error; it is
/// reported as `Ok(None)` by the decode functions. End of stream
/// mid-frame is [`ProtocolError::Truncated`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer closed the stream part-way through a frame
    #[error("stream ended mid-frame")]
    Truncated,
    /// The frame began with a type tag we do not understand
    #[error("unknown frame type tag {0:#04x}")]
    UnknownTag(u8),
    /// A length field exceeded the sanity limit for its field
    #[error("{field} length {length} exceeds limit {limit}")]
    FieldTooLong {
        /// which field was oversized
        field: &'static str,
        /// the length claimed or required
        length: usize,
        /// the limit for this field
        limit: usize,
    },
    /// A string field was not valid UTF-8
    #[error("{0} is not valid UTF-8")]
    BadUtf8(&'static str),
    /// Transport-level failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Is this error a decode failure (as opposed to a transport failure)?
    #[must_use]
    pub fn is_decode(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}

pub(crate) fn check_length(
    field: &'static str,
    length: usize,
    limit: usize,
) -> Result<(), ProtocolError> {
    if length > limit {
        return Err(ProtocolError::FieldTooLong {
            field,
            length,
            limit,
        });
    }
    Ok(())
}

/// Maps an unexpected EOF to [`ProtocolError::Truncated`].
/// Used for every read after the frame's tag byte.
fn mid_frame(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(e)
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// FIELD PRIMITIVES

/// Reads a frame's tag byte. `Ok(None)` means the peer closed cleanly.
pub(crate) async fn read_tag<R: ReceivingStream>(
    recv: &mut R,
) -> Result<Option<u8>, ProtocolError> {
    match recv.read_u8().await {
        Ok(tag) => Ok(Some(tag)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads a `u16` length prefix, checks it, then reads that many bytes.
pub(crate) async fn read_bytes_u16<R: ReceivingStream>(
    recv: &mut R,
    field: &'static str,
    limit: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let length = usize::from(recv.read_u16().await.map_err(mid_frame)?);
    check_length(field, length, limit)?;
    read_exactly(recv, length).await
}

/// Reads a `u32` length prefix, checks it, then reads that many bytes.
pub(crate) async fn read_bytes_u32<R: ReceivingStream>(
    recv: &mut R,
    field: &'static str,
    limit: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let length = recv.read_u32().await.map_err(mid_frame)? as usize;
    check_length(field, length, limit)?;
    read_exactly(recv, length).await
}

async fn read_exactly<R: ReceivingStream>(
    recv: &mut R,
    length: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buffer = BytesMut::zeroed(length);
    let _ = recv.read_exact(&mut buffer).await.map_err(mid_frame)?;
    Ok(buffer.to_vec())
}

pub(crate) fn decode_utf8(
    bytes: Vec<u8>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    String::from_utf8(bytes).map_err(|_| ProtocolError::BadUtf8(field))
}

/// Appends a `u16`-prefixed field to an outgoing frame.
/// The caller is expected to have already checked the length.
pub(crate) fn put_bytes_u16(buffer: &mut BytesMut, bytes: &[u8]) {
    #[allow(clippy::cast_possible_truncation)] // length checked by caller
    buffer.put_u16(bytes.len() as u16);
    buffer.put_slice(bytes);
}

/// Appends a `u32`-prefixed field to an outgoing frame.
/// The caller is expected to have already checked the length.
pub(crate) fn put_bytes_u32(buffer: &mut BytesMut, bytes: &[u8]) {
    #[allow(clippy::cast_possible_truncation)] // length checked by caller
    buffer.put_u32(bytes.len() as u32);
    buffer.put_slice(bytes);
}

/////////////////////////////////////////////////////////////////////////////////////////////
