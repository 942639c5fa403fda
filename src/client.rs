//! Client-side controller: connect, listen, send, disconnect
// (c) 2025 Ross Younger

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::{ConnectionState, Event, EventSender};
use crate::policy::{extension_of, ExtensionSet};
use crate::protocol::{ControlNotice, ProtocolError, TransferMessage};
use crate::session::{Session, SessionReceiver, SessionSender};

/// Ways a client operation can fail.
///
/// Validation failures (`NotConnected`, `EmptyMessage`, `NoFilename`,
/// `ExtensionRejected`) are reported before any I/O is attempted.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect failed
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// the address we tried
        addr: SocketAddr,
        /// the underlying failure
        source: std::io::Error,
    },
    /// A session is already open
    #[error("already connected")]
    AlreadyConnected,
    /// The operation needs an open session
    #[error("not connected")]
    NotConnected,
    /// Text message was empty after trimming
    #[error("message is empty")]
    EmptyMessage,
    /// The path has no usable filename component
    #[error("{0} has no usable filename")]
    NoFilename(PathBuf),
    /// Pre-flight policy check failed; nothing was sent.
    /// The server would reject this anyway; failing locally is cheaper.
    #[error("file type .{0} is not in the server's allow-list")]
    ExtensionRejected(String),
    /// The local file could not be read
    #[error("could not read {path}: {source}")]
    FileRead {
        /// the file we tried to read
        path: PathBuf,
        /// the underlying failure
        source: std::io::Error,
    },
    /// Wire-level failure; the session has been torn down
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Everything tied to one open connection
#[derive(Debug)]
struct Link {
    sender: SessionSender<OwnedWriteHalf>,
    /// Snapshot of the allow-set the server announced; replaced whenever
    /// a new policy list arrives
    policy: Arc<Mutex<ExtensionSet>>,
    shutdown: CancellationToken,
    listen_task: JoinHandle<()>,
}

/// Drives the client side of the protocol.
///
/// The controller owns the sending direction; a background listen task
/// owns the receiving direction and reports what it hears as [`Event`]s.
#[derive(Debug)]
pub struct Controller {
    events: EventSender,
    state: Arc<Mutex<ConnectionState>>,
    link: Option<Link>,
}

impl Controller {
    /// Creates a disconnected controller reporting to `events`
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            link: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Snapshot of the server's announced allow-set; empty until the
    /// policy list arrives (or when disconnected)
    #[must_use]
    pub fn allowed_extensions(&self) -> ExtensionSet {
        self.link.as_ref().map_or_else(ExtensionSet::default, |l| {
            l.policy
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        })
    }

    /// Opens a connection and starts the background listen task.
    ///
    /// Reconnecting after the server closed the previous session is fine;
    /// only a still-live session refuses with `AlreadyConnected`.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<(), ClientError> {
        if let Some(link) = self.link.take() {
            if link.listen_task.is_finished() {
                // The session closed from the far side; discard its remains.
                drop(link);
            } else {
                self.link = Some(link);
                return Err(ClientError::AlreadyConnected);
            }
        }
        set_state(&self.state, &self.events, ConnectionState::Connecting);
        self.events.log(format!("connecting to {addr}"));

        let socket = match TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(source) => {
                set_state(&self.state, &self.events, ConnectionState::Disconnected);
                self.events.log(format!("connection failed: {source}"));
                return Err(ClientError::Connect { addr, source });
            }
        };
        let (recv, send) = socket.into_split();
        let (sender, receiver) = Session::from((send, recv)).split();

        let policy = Arc::new(Mutex::new(ExtensionSet::default()));
        let shutdown = CancellationToken::new();
        // Connected must be visible before the listen task starts: an
        // immediate EOF flips the state to Disconnected, and that must not
        // be overwritten afterwards.
        set_state(&self.state, &self.events, ConnectionState::Connected);
        let listen_task = tokio::spawn(listen_loop(
            receiver,
            self.events.clone(),
            Arc::clone(&policy),
            Arc::clone(&self.state),
            shutdown.clone(),
        ));
        self.link = Some(Link {
            sender,
            policy,
            shutdown,
            listen_task,
        });
        self.events.log(format!("connected to {addr}"));
        Ok(())
    }

    /// Sends a text message. The body must be non-empty after trimming.
    pub async fn send_text(&mut self, body: &str) -> Result<(), ClientError> {
        if body.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let message = TransferMessage::Text { body: body.into() };
        self.send_message(&message).await?;
        self.events.log(format!("text message sent: {body}"));
        Ok(())
    }

    /// Reads a file fully into memory and sends it.
    ///
    /// If the cached allow-set is non-empty and does not contain the
    /// file's extension, this fails locally without touching the wire.
    /// That is an optimisation, not a security boundary; the server
    /// re-validates regardless.
    pub async fn send_file(&mut self, path: &Path) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let filename = path
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| ClientError::NoFilename(path.to_path_buf()))?
            .to_string();
        let extension = extension_of(&filename);
        let allowed = self.allowed_extensions();
        if !allowed.is_empty() && !allowed.allows(&extension) {
            self.events
                .log(format!("file type .{extension} not allowed by server (local check)"));
            return Err(ClientError::ExtensionRejected(extension));
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let size = data.len();
        let message = TransferMessage::File {
            filename: filename.clone(),
            data,
        };
        self.send_message(&message).await?;
        self.events
            .log(format!("sent file {filename} ({size} bytes)"));
        Ok(())
    }

    /// Closes the connection. Idempotent.
    ///
    /// Sends a best-effort shutdown notice first; the controller ends up
    /// Disconnected whether or not that reaches the server.
    pub async fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            set_state(&self.state, &self.events, ConnectionState::Disconnected);
            return;
        };
        if link.listen_task.is_finished() {
            // Session already closed from the far side; nothing to notify.
            if let Err(e) = link.listen_task.await {
                warn!("listen task ended abnormally: {e}");
            }
            set_state(&self.state, &self.events, ConnectionState::Disconnected);
            return;
        }
        set_state(&self.state, &self.events, ConnectionState::Disconnecting);
        if let Err(e) = link
            .sender
            .send(&TransferMessage::Control(ControlNotice::Shutdown))
            .await
        {
            debug!("could not send shutdown notice: {e}");
        }
        link.sender.close().await;
        link.shutdown.cancel();
        if let Err(e) = link.listen_task.await {
            warn!("listen task ended abnormally: {e}");
        }
        set_state(&self.state, &self.events, ConnectionState::Disconnected);
        self.events.log("disconnected");
    }

    /// Sends one message on the open session; any wire failure tears the
    /// session down before the error is returned.
    async fn send_message(&mut self, message: &TransferMessage) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let result = match self.link.as_mut() {
            Some(link) => link.sender.send(message).await,
            None => return Err(ClientError::NotConnected),
        };
        if let Err(e) = result {
            error!("send failed: {e}");
            self.events.log(format!("send failed: {e}"));
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Updates the shared state, emitting an event only on a real change
fn set_state(
    state: &Arc<Mutex<ConnectionState>>,
    events: &EventSender,
    next: ConnectionState,
) {
    let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if *guard != next {
        *guard = next;
        events.emit(Event::ConnectionState(next));
    }
}

/// Background receive activity: the only reader of this connection.
///
/// Runs until the server closes, the transport fails, or the controller
/// cancels it during disconnect.
async fn listen_loop(
    mut receiver: SessionReceiver<OwnedReadHalf>,
    events: EventSender,
    policy: Arc<Mutex<ExtensionSet>>,
    state: Arc<Mutex<ConnectionState>>,
    shutdown: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            () = shutdown.cancelled() => break,
            outcome = receiver.receive() => outcome,
        };
        match outcome {
            Ok(Some(TransferMessage::Control(ControlNotice::PolicyList(set)))) => {
                events.log(format!("server allows file types: {set}"));
                *policy
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = set.clone();
                events.emit(Event::PolicyReceived(set));
            }
            Ok(Some(TransferMessage::Control(ControlNotice::ServerReady))) => {
                events.log("server ready to receive");
            }
            Ok(Some(TransferMessage::Control(ControlNotice::ExtensionError(ext)))) => {
                warn!("server rejected file type .{ext}");
                events.emit(Event::SendRejected(ext));
            }
            Ok(Some(TransferMessage::Control(ControlNotice::Busy))) => {
                events.log("server is busy with another client");
                break;
            }
            Ok(Some(TransferMessage::Control(other))) => {
                events.log(format!("server notice: {other}"));
            }
            Ok(Some(TransferMessage::Text { body })) => {
                events.log(format!("message from server: {body}"));
            }
            Ok(Some(TransferMessage::File { filename, .. })) => {
                // Data flows client to server only; this is a confused peer.
                debug!("ignoring unexpected file payload {filename:?} from server");
            }
            Ok(None) => {
                events.log("server closed the connection");
                break;
            }
            Err(e) => {
                error!("receive failed: {e}");
                events.log(format!("connection error: {e}"));
                break;
            }
        }
    }
    // If the loop ended of its own accord (EOF, error, busy) rather than
    // by a foreground disconnect, the controller is now disconnected.
    if !shutdown.is_cancelled() {
        set_state(&state, &events, ConnectionState::Disconnected);
    }
}
