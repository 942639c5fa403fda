//! Connection session: one live socket, wrapped for protocol I/O
// (c) 2025 Ross Younger

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::protocol::{
    ProtocolError, ReceivingStream, SendReceivePair, SendingStream, TransferMessage,
};

/// The sending direction of a session.
///
/// Exactly one activity may own this at a time; that is what makes writes
/// safe without further locking (see the crate's concurrency notes).
#[derive(Debug)]
pub struct SessionSender<S: SendingStream> {
    stream: S,
    open: bool,
}

impl<S: SendingStream> SessionSender<S> {
    /// Sends one message. Fails if the session has been closed.
    pub async fn send(&mut self, message: &TransferMessage) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session is closed",
            )));
        }
        message.write_to(&mut self.stream).await
    }

    /// Closes the sending direction. Idempotent; shutdown failures are
    /// logged, not returned, since there is nothing useful a caller can
    /// do about them.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!("error shutting down session stream: {e}");
        }
    }

    /// Is the sending direction still open?
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// The receiving direction of a session
#[derive(Debug)]
pub struct SessionReceiver<R: ReceivingStream> {
    stream: R,
}

impl<R: ReceivingStream> SessionReceiver<R> {
    /// Blocks this activity until a frame arrives, the peer closes
    /// (`Ok(None)`), or the transport fails.
    pub async fn receive(&mut self) -> Result<Option<TransferMessage>, ProtocolError> {
        TransferMessage::read_from(&mut self.stream).await
    }
}

/// One live connection, owning both directions of the underlying
/// transport and the codec state bound to it.
///
/// A session may be driven whole (the server's handling loop sends and
/// receives from a single task) or [split](Session::split) so that a
/// foreground send path and a background receive activity each own one
/// direction, which is the client's shape.
#[derive(Debug)]
pub struct Session<S: SendingStream, R: ReceivingStream> {
    sender: SessionSender<S>,
    receiver: SessionReceiver<R>,
}

impl<S: SendingStream, R: ReceivingStream> Session<S, R> {
    /// Wraps a transport's send/receive pair as an open session
    pub fn new(stream: SendReceivePair<S, R>) -> Self {
        Self {
            sender: SessionSender {
                stream: stream.send,
                open: true,
            },
            receiver: SessionReceiver {
                stream: stream.recv,
            },
        }
    }

    /// Sends one message to the peer
    pub async fn send(&mut self, message: &TransferMessage) -> Result<(), ProtocolError> {
        self.sender.send(message).await
    }

    /// Receives the next message; `Ok(None)` is a clean end of stream
    pub async fn receive(&mut self) -> Result<Option<TransferMessage>, ProtocolError> {
        self.receiver.receive().await
    }

    /// Closes the session. Idempotent; safe on all paths.
    pub async fn close(&mut self) {
        self.sender.close().await;
    }

    /// Is the session open?
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Splits the session so each direction can be owned by its own
    /// activity
    #[must_use]
    pub fn split(self) -> (SessionSender<S>, SessionReceiver<R>) {
        (self.sender, self.receiver)
    }
}

impl<S: SendingStream, R: ReceivingStream> From<(S, R)> for Session<S, R> {
    fn from(value: (S, R)) -> Self {
        Self::new(value.into())
    }
}
