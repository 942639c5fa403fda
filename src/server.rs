//! Server listener and per-connection event loop
// (c) 2025 Ross Younger

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use tokio::io::AsyncWriteExt as _;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventSender};
use crate::policy::{extension_of, ExtensionSet};
use crate::protocol::{ControlNotice, ReceivingStream, SendingStream, TransferMessage};
use crate::session::Session;

/// Where received files land when the operator does not say otherwise
pub const DEFAULT_DEST_DIR: &str = "received_files";

/// Listener lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ListenerState {
    /// Not running
    Stopped,
    /// Binding the listening socket
    Starting,
    /// Accepting connections
    Listening,
}

/// Operator-supplied settings for a [`Listener`]
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address and port to listen on
    pub addr: SocketAddr,
    /// The allow-set announced to, and enforced against, each session
    pub allowed: ExtensionSet,
    /// Directory that received files are written into (created if absent)
    pub dest_dir: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], crate::protocol::DEFAULT_PORT)),
            allowed: ExtensionSet::standard(),
            dest_dir: PathBuf::from(DEFAULT_DEST_DIR),
        }
    }
}

/// The server: accepts connections, enforcing the at-most-one-active-
/// session admission rule, and runs the handling loop for the session it
/// admits.
///
/// The allow-set is fixed for the lifetime of the listener; change it by
/// stopping and starting again.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    /// Shared with the accept loop, which marks it Stopped when it exits
    /// (whether cancelled or felled by an accept failure)
    state: Arc<Mutex<ListenerState>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    /// Binds the listening socket and starts the accept loop.
    ///
    /// Status is reported through `events`; per-connection activity also
    /// lands there.
    pub async fn bind(config: ListenerConfig, events: EventSender) -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(ListenerState::Starting));
        events.log(format!("server state: {}", ListenerState::Starting));
        tokio::fs::create_dir_all(&config.dest_dir)
            .await
            .with_context(|| {
                format!("could not create destination {}", config.dest_dir.display())
            })?;
        let listener = TcpListener::bind(config.addr)
            .await
            .with_context(|| format!("could not bind {}", config.addr))?;
        let local_addr = listener.local_addr()?;
        info!(
            "listening on {local_addr}; allowed extensions: {}",
            config.allowed
        );
        events.log(format!("server started on port {}", local_addr.port()));

        set_state(&state, ListenerState::Listening);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            config,
            events,
            shutdown.clone(),
            Arc::clone(&state),
        ));
        Ok(Self {
            local_addr,
            state,
            shutdown,
            task,
        })
    }

    /// The address actually bound (useful when the config asked for port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stops accepting, closes any open session, and waits for the accept
    /// loop to finish. Failures while stopping are reported, not fatal.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("error stopping server: {e}");
        }
        info!("server stopped");
    }
}

fn set_state(state: &Arc<Mutex<ListenerState>>, next: ListenerState) {
    *state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = next;
}

/// Accept loop. Runs until cancelled or the listening socket fails.
async fn accept_loop(
    listener: TcpListener,
    config: ListenerConfig,
    events: EventSender,
    shutdown: CancellationToken,
    state: Arc<Mutex<ListenerState>>,
) {
    // One permit: the admission rule. The permit travels with the handler
    // task and is released when its session closes, so there is no window
    // in which a second client can slip in.
    let admission = Arc::new(Semaphore::new(1));
    let mut handlers: JoinSet<()> = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!("accept failed: {e}");
                events.log(format!("server error: {e}"));
                break;
            }
        };
        match Arc::clone(&admission).try_acquire_owned() {
            Ok(permit) => {
                events.log(format!("client connected: {peer}"));
                let (recv, send) = socket.into_split();
                let session = Session::from((send, recv));
                let allowed = config.allowed.clone();
                let dest_dir = config.dest_dir.clone();
                let events = events.clone();
                let token = shutdown.child_token();
                let _ = handlers.spawn(async move {
                    handle_session(session, &allowed, &dest_dir, &events, &token).await;
                    drop(permit);
                });
            }
            Err(_) => {
                warn!("rejecting {peer}: a session is already active");
                events.log(format!("client rejected (busy): {peer}"));
                tokio::spawn(reject_busy(socket));
            }
        }
    }

    // Cancellation has propagated to the handler (child token); wait for
    // it to close its session.
    while handlers.join_next().await.is_some() {}
    set_state(&state, ListenerState::Stopped);
    events.log(format!("server state: {}", ListenerState::Stopped));
}

/// Tells a surplus client the server is busy, then closes the socket.
/// Best-effort; no session is created.
async fn reject_busy(mut socket: TcpStream) {
    let busy = TransferMessage::Control(ControlNotice::Busy);
    if let Err(e) = busy.write_to(&mut socket).await {
        debug!("could not send busy notice: {e}");
    }
    let _ = socket.shutdown().await;
}

/// Per-connection handling loop: policy handshake, then receive until the
/// client shuts down, the stream ends, or we are cancelled.
///
/// All I/O and decode failures are converted into close-and-notify here;
/// nothing propagates to the accept loop.
async fn handle_session<S, R>(
    mut session: Session<S, R>,
    allowed: &ExtensionSet,
    dest_dir: &Path,
    events: &EventSender,
    shutdown: &CancellationToken,
) where
    S: SendingStream,
    R: ReceivingStream,
{
    let handshake = async {
        session
            .send(&TransferMessage::Control(ControlNotice::PolicyList(
                allowed.clone(),
            )))
            .await?;
        session
            .send(&TransferMessage::Control(ControlNotice::ServerReady))
            .await
    };
    if let Err(e) = handshake.await {
        error!("could not complete session handshake: {e}");
        session.close().await;
        return;
    }
    events.log(format!("sent allow-list to client: {allowed}"));

    loop {
        let outcome = tokio::select! {
            () = shutdown.cancelled() => break,
            outcome = session.receive() => outcome,
        };
        match outcome {
            Ok(Some(TransferMessage::Text { body })) => {
                info!("text message: {body}");
                events.emit(Event::InboundText(body));
            }
            Ok(Some(TransferMessage::File { filename, data })) => {
                handle_file(&mut session, allowed, dest_dir, events, &filename, &data).await;
            }
            Ok(Some(TransferMessage::Control(ControlNotice::Shutdown))) => {
                events.log("client requested disconnect");
                break;
            }
            Ok(Some(TransferMessage::Control(other))) => {
                debug!("ignoring unexpected control notice: {other}");
            }
            Ok(None) => {
                events.log("client disconnected");
                break;
            }
            Err(e) if e.is_decode() => {
                error!("malformed frame from client: {e}");
                events.log(format!("protocol error: {e}"));
                break;
            }
            Err(e) => {
                error!("session I/O error: {e}");
                events.log(format!("connection error: {e}"));
                break;
            }
        }
    }
    session.close().await;
    events.log("connection closed");
}

/// Validates and persists one received file.
///
/// A policy violation (or an unsafe filename) discards the payload and
/// answers with a `FILE_TYPE_ERROR` notice; the session stays open.
async fn handle_file<S, R>(
    session: &mut Session<S, R>,
    allowed: &ExtensionSet,
    dest_dir: &Path,
    events: &EventSender,
    filename: &str,
    data: &[u8],
) where
    S: SendingStream,
    R: ReceivingStream,
{
    let extension = extension_of(filename);

    let refusal = if !allowed.allows(&extension) {
        warn!("file type .{extension} not allowed: {filename:?}");
        true
    } else if !filename_is_safe(filename) {
        // Never trust the sender's filename as a path.
        warn!("rejecting unsafe filename {filename:?}");
        true
    } else {
        false
    };
    if refusal {
        events.emit(Event::SendRejected(extension.clone()));
        let notice = TransferMessage::Control(ControlNotice::ExtensionError(extension));
        if let Err(e) = session.send(&notice).await {
            error!("could not send rejection notice: {e}");
        }
        return;
    }

    let path = dest_dir.join(filename);
    match tokio::fs::write(&path, data).await {
        Ok(()) => {
            info!("stored {} ({} bytes)", path.display(), data.len());
            events.emit(Event::FileStored(filename.to_string()));
        }
        Err(e) => {
            // Disk trouble is our problem, not a protocol event; the
            // session stays open.
            error!("could not write {}: {e}", path.display());
            events.log(format!("failed to store {filename}: {e}"));
        }
    }
}

/// A received filename must be a bare filename: no separators, no
/// traversal segments, nothing empty.
fn filename_is_safe(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::{filename_is_safe, handle_session, Listener, ListenerConfig, ListenerState};
    use crate::events::{Event, EventSender};
    use crate::policy::ExtensionSet;
    use crate::protocol::{ControlNotice, TransferMessage};
    use crate::session::Session;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    #[rstest]
    #[case("report.txt", true)]
    #[case("a", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case(".", false)]
    #[case("../evil.txt", false)]
    #[case("nested/evil.txt", false)]
    #[case("..\\evil.txt", false)]
    #[case("/etc/passwd", false)]
    fn filename_safety(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(filename_is_safe(name), expected);
    }

    /// Drives `handle_session` over an in-memory duplex pipe, playing the
    /// client side by hand.
    struct Harness {
        client: tokio::io::DuplexStream,
        events: tokio::sync::mpsc::UnboundedReceiver<Event>,
        task: tokio::task::JoinHandle<()>,
        dir: tempfile::TempDir,
    }

    fn start_harness(allowed: &str) -> Harness {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let (read, write) = tokio::io::split(server);
        let session = Session::from((write, read));
        let (events_tx, events) = EventSender::channel();
        let dir = tempfile::tempdir().unwrap();
        let allowed = ExtensionSet::normalize(allowed);
        let dest = dir.path().to_path_buf();
        let token = CancellationToken::new();
        let task = tokio::spawn(async move {
            handle_session(session, &allowed, &dest, &events_tx, &token).await;
        });
        Harness {
            client,
            events,
            task,
            dir,
        }
    }

    async fn read_message(client: &mut tokio::io::DuplexStream) -> TransferMessage {
        TransferMessage::read_from(client).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn handshake_then_file_accept_and_reject() {
        let mut h = start_harness("txt,png");

        // Handshake: allow-list then ready, in that order.
        assert_eq!(
            read_message(&mut h.client).await,
            TransferMessage::Control(ControlNotice::PolicyList(ExtensionSet::normalize(
                "txt,png"
            )))
        );
        assert_eq!(
            read_message(&mut h.client).await,
            TransferMessage::Control(ControlNotice::ServerReady)
        );

        // An allowed file is stored; no reply.
        TransferMessage::File {
            filename: "report.txt".into(),
            data: b"hello".to_vec(),
        }
        .write_to(&mut h.client)
        .await
        .unwrap();
        loop {
            match h.events.recv().await.unwrap() {
                Event::FileStored(name) => {
                    assert_eq!(name, "report.txt");
                    break;
                }
                Event::Log(_) => (),
                other => panic!("unexpected event {other:?}"),
            }
        }
        let stored = std::fs::read(h.dir.path().join("report.txt")).unwrap();
        assert_eq!(stored, b"hello");

        // A disallowed extension gets exactly one error notice and no file.
        TransferMessage::File {
            filename: "image.gif".into(),
            data: vec![1, 2, 3],
        }
        .write_to(&mut h.client)
        .await
        .unwrap();
        assert_eq!(
            read_message(&mut h.client).await,
            TransferMessage::Control(ControlNotice::ExtensionError("gif".into()))
        );
        assert!(!h.dir.path().join("image.gif").exists());

        // Clean shutdown.
        TransferMessage::Control(ControlNotice::Shutdown)
            .write_to(&mut h.client)
            .await
            .unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn traversal_filename_is_never_written() {
        let mut h = start_harness("txt");
        let _ = read_message(&mut h.client).await; // allow-list
        let _ = read_message(&mut h.client).await; // ready

        TransferMessage::File {
            filename: "../escape.txt".into(),
            data: b"oops".to_vec(),
        }
        .write_to(&mut h.client)
        .await
        .unwrap();
        assert_eq!(
            read_message(&mut h.client).await,
            TransferMessage::Control(ControlNotice::ExtensionError("txt".into()))
        );
        assert!(!h.dir.path().parent().unwrap().join("escape.txt").exists());
        assert!(!h.dir.path().join("escape.txt").exists());

        TransferMessage::Control(ControlNotice::Shutdown)
            .write_to(&mut h.client)
            .await
            .unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn inbound_text_becomes_an_event() {
        let mut h = start_harness("txt");
        let _ = read_message(&mut h.client).await;
        let _ = read_message(&mut h.client).await;

        TransferMessage::Text {
            body: "ping".into(),
        }
        .write_to(&mut h.client)
        .await
        .unwrap();
        loop {
            match h.events.recv().await.unwrap() {
                Event::InboundText(body) => {
                    assert_eq!(body, "ping");
                    break;
                }
                Event::Log(_) => (),
                other => panic!("unexpected event {other:?}"),
            }
        }

        // EOF (client dropping its end) also terminates the loop.
        drop(h.client);
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_closes_the_session() {
        use tokio::io::AsyncWriteExt as _;
        let mut h = start_harness("txt");
        let _ = read_message(&mut h.client).await; // allow-list
        let _ = read_message(&mut h.client).await; // ready

        // A tag byte the codec does not know. The handler must give up on
        // the session rather than carry on out of sync.
        h.client.write_all(&[0xEE]).await.unwrap();
        h.client.flush().await.unwrap();
        h.task.await.unwrap();

        // The server closed its end...
        assert!(TransferMessage::read_from(&mut h.client)
            .await
            .unwrap()
            .is_none());
        // ...and reported why.
        let mut saw_error = false;
        while let Ok(event) = h.events.try_recv() {
            if matches!(&event, Event::Log(text) if text.contains("protocol error")) {
                saw_error = true;
            }
        }
        assert!(saw_error, "no protocol error was reported");
    }

    #[tokio::test]
    async fn lifecycle_state_tracks_the_accept_loop() {
        let (events_tx, _events) = EventSender::channel();
        let dir = tempfile::tempdir().unwrap();
        let config = ListenerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            allowed: ExtensionSet::standard(),
            dest_dir: dir.path().to_path_buf(),
        };
        let listener = Listener::bind(config, events_tx).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);

        // stop() consumes the listener; watch the shared state directly.
        let state = std::sync::Arc::clone(&listener.state);
        listener.stop().await;
        assert_eq!(*state.lock().unwrap(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_waiting_receive() {
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let session = Session::from((write, read));
        let (events_tx, _events) = EventSender::channel();
        let token = CancellationToken::new();
        let inner = token.clone();
        let task = tokio::spawn(async move {
            let allowed = ExtensionSet::standard();
            let dest = std::env::temp_dir();
            handle_session(session, &allowed, &dest, &events_tx, &inner).await;
        });
        // Swallow the handshake, then leave the handler blocked in receive.
        let mut client = client;
        let _ = read_message(&mut client).await;
        let _ = read_message(&mut client).await;

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("handler did not unblock")
            .unwrap();
    }
}
