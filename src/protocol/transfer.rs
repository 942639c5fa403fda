//! Transfer protocol message definitions and their frame codec
// (c) 2025 Ross Younger
//!
//! The protocol runs over one persistent TCP connection.
//!
//! * Server ➡️ Client, on session establishment:
//!   [`ControlNotice::PolicyList`] then [`ControlNotice::ServerReady`].
//! * Client ➡️ Server, thereafter: any number of [`TransferMessage::Text`]
//!   and [`TransferMessage::File`] frames, finishing (if the client
//!   disconnects deliberately) with [`ControlNotice::Shutdown`].
//! * Server ➡️ Client, on a policy violation:
//!   [`ControlNotice::ExtensionError`]. The session stays open.
//!
//! Frame layout is described in [`common`](super::common).

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;

use super::common::{
    check_length, decode_utf8, put_bytes_u16, put_bytes_u32, read_bytes_u16, read_bytes_u32,
    read_tag, ProtocolError, ReceivingStream, SendingStream, MAX_CONTROL_BYTES, MAX_FILENAME_BYTES,
    MAX_FILE_BYTES, MAX_TEXT_BYTES,
};
use crate::policy::ExtensionSet;

/// Frame type tag for a text message
const TAG_TEXT: u8 = 0;
/// Frame type tag for a file payload
const TAG_FILE: u8 = 1;
/// Frame type tag for a control notice
const TAG_CONTROL: u8 = 2;

/// Wire prefix announcing the server's allow-set
const PREFIX_POLICY: &str = "FILE_TYPE_LIST:";
/// Wire prefix reporting a rejected extension.
/// The offending extension is appended directly, with no further separator.
const PREFIX_EXTENSION_ERROR: &str = "FILE_TYPE_ERROR:";
/// Wire literal: server is ready to receive
const READY: &str = "SERVER_READY";
/// Wire literal: client requests session shutdown
const SHUTDOWN: &str = "SERVER_SHUTDOWN";
/// Wire literal: server refused the connection, another session is active
const BUSY: &str = "SERVER_BUSY";

/// Out-of-band signals carried as string-valued control frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlNotice {
    /// The server's current allow-set, sent on session establishment
    PolicyList(ExtensionSet),
    /// The server has finished session setup and will accept payloads
    ServerReady,
    /// A file payload was refused because of its extension
    ExtensionError(String),
    /// The client is about to close the connection
    Shutdown,
    /// The connection was refused because a session is already active
    Busy,
    /// A notice we do not recognise; surfaced to the caller verbatim
    Other(String),
}

impl ControlNotice {
    /// The notice's exact on-wire rendering
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            ControlNotice::PolicyList(set) => format!("{PREFIX_POLICY}{set}"),
            ControlNotice::ServerReady => READY.into(),
            ControlNotice::ExtensionError(ext) => format!("{PREFIX_EXTENSION_ERROR}{ext}"),
            ControlNotice::Shutdown => SHUTDOWN.into(),
            ControlNotice::Busy => BUSY.into(),
            ControlNotice::Other(s) => s.clone(),
        }
    }

    /// Interprets a received control string
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix(PREFIX_POLICY) {
            ControlNotice::PolicyList(ExtensionSet::normalize(rest))
        } else if let Some(rest) = s.strip_prefix(PREFIX_EXTENSION_ERROR) {
            ControlNotice::ExtensionError(rest.to_string())
        } else {
            match s {
                READY => ControlNotice::ServerReady,
                SHUTDOWN => ControlNotice::Shutdown,
                BUSY => ControlNotice::Busy,
                _ => ControlNotice::Other(s.to_string()),
            }
        }
    }
}

impl std::fmt::Display for ControlNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// One protocol message: the typed payload sum carried by each frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    /// A chat-style text message
    Text {
        /// message body
        body: String,
    },
    /// A complete file, sent in one frame.
    /// The extension is always recomputed from the filename by the
    /// receiver; it is never transmitted separately.
    File {
        /// filename as supplied by the sender (not trusted; see server-side checks)
        filename: String,
        /// file contents
        data: Vec<u8>,
    },
    /// An out-of-band control signal
    Control(ControlNotice),
}

impl TransferMessage {
    /// Encodes this message as a single frame.
    ///
    /// Fails if any field exceeds its wire limit; nothing is written in
    /// that case.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buffer = BytesMut::new();
        match self {
            TransferMessage::Text { body } => {
                check_length("text body", body.len(), MAX_TEXT_BYTES)?;
                buffer.put_u8(TAG_TEXT);
                put_bytes_u32(&mut buffer, body.as_bytes());
            }
            TransferMessage::File { filename, data } => {
                check_length("filename", filename.len(), MAX_FILENAME_BYTES)?;
                check_length("file data", data.len(), MAX_FILE_BYTES)?;
                buffer.put_u8(TAG_FILE);
                put_bytes_u16(&mut buffer, filename.as_bytes());
                put_bytes_u32(&mut buffer, data);
            }
            TransferMessage::Control(notice) => {
                let wire = notice.to_wire();
                check_length("control notice", wire.len(), MAX_CONTROL_BYTES)?;
                buffer.put_u8(TAG_CONTROL);
                put_bytes_u16(&mut buffer, wire.as_bytes());
            }
        }
        Ok(buffer.to_vec())
    }

    /// Serializes this message into an async writer as one frame, then flushes.
    pub async fn write_to<W: SendingStream>(&self, send: &mut W) -> Result<(), ProtocolError> {
        let frame = self.to_frame()?;
        send.write_all(&frame).await?;
        send.flush().await?;
        Ok(())
    }

    /// Deserializes one message from an async reader.
    ///
    /// # Return
    /// * `Ok(Some(msg))`: a complete frame was read
    /// * `Ok(None)`: the peer closed the stream cleanly between frames
    /// * `Err(_)`: malformed frame, oversize length field, or I/O failure
    pub async fn read_from<R: ReceivingStream>(
        recv: &mut R,
    ) -> Result<Option<Self>, ProtocolError> {
        let Some(tag) = read_tag(recv).await? else {
            return Ok(None);
        };
        let message = match tag {
            TAG_TEXT => {
                let body = read_bytes_u32(recv, "text body", MAX_TEXT_BYTES).await?;
                TransferMessage::Text {
                    body: decode_utf8(body, "text body")?,
                }
            }
            TAG_FILE => {
                let filename = read_bytes_u16(recv, "filename", MAX_FILENAME_BYTES).await?;
                let data = read_bytes_u32(recv, "file data", MAX_FILE_BYTES).await?;
                TransferMessage::File {
                    filename: decode_utf8(filename, "filename")?,
                    data,
                }
            }
            TAG_CONTROL => {
                let wire = read_bytes_u16(recv, "control notice", MAX_CONTROL_BYTES).await?;
                TransferMessage::Control(ControlNotice::from_wire(&decode_utf8(
                    wire,
                    "control notice",
                )?))
            }
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(Some(message))
    }
}
