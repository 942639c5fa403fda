//! End to end tests over loopback TCP
// (c) 2025 Ross Younger

use std::net::SocketAddr;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

use fling::client::{ClientError, Controller};
use fling::events::{ConnectionState, Event, EventSender};
use fling::policy::ExtensionSet;
use fling::protocol::{ControlNotice, TransferMessage};
use fling::server::{Listener, ListenerConfig};

const DEADLINE: Duration = Duration::from_secs(10);

struct TestServer {
    listener: Listener,
    events: UnboundedReceiver<Event>,
    dir: tempfile::TempDir,
}

impl TestServer {
    async fn start(allow: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ListenerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            allowed: ExtensionSet::normalize(allow),
            dest_dir: dir.path().to_path_buf(),
        };
        let (events_tx, events) = EventSender::channel();
        let listener = Listener::bind(config, events_tx).await.unwrap();
        Self {
            listener,
            events,
            dir,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Pumps server events until one matches, failing on timeout
    async fn expect_event(&mut self, predicate: impl Fn(&Event) -> bool) -> Event {
        loop {
            let event = tokio::time::timeout(DEADLINE, self.events.recv())
                .await
                .expect("timed out waiting for a server event")
                .expect("server event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    }
}

async fn connected_client(addr: SocketAddr) -> (Controller, UnboundedReceiver<Event>) {
    let (events_tx, mut events) = EventSender::channel();
    let mut controller = Controller::new(events_tx);
    controller.connect(addr).await.unwrap();
    // Wait for the allow-set so local pre-flight checks are armed.
    loop {
        let event = tokio::time::timeout(DEADLINE, events.recv())
            .await
            .expect("timed out waiting for the policy announcement")
            .expect("client event channel closed");
        if matches!(event, Event::PolicyReceived(_)) {
            break;
        }
    }
    (controller, events)
}

#[tokio::test]
async fn text_and_file_transfer() {
    let mut server = TestServer::start("txt,png").await;
    let (mut client, _events) = connected_client(server.addr()).await;
    assert_eq!(
        client.allowed_extensions(),
        ExtensionSet::normalize("txt,png")
    );

    client.send_text("ping").await.unwrap();
    let event = server
        .expect_event(|e| matches!(e, Event::InboundText(_)))
        .await;
    assert_eq!(event, Event::InboundText("ping".into()));

    let staging = tempfile::tempdir().unwrap();
    let path = staging.path().join("report.txt");
    std::fs::write(&path, b"hello").unwrap();
    client.send_file(&path).await.unwrap();
    let event = server
        .expect_event(|e| matches!(e, Event::FileStored(_)))
        .await;
    assert_eq!(event, Event::FileStored("report.txt".into()));
    let stored = std::fs::read(server.dir.path().join("report.txt")).unwrap();
    assert_eq!(stored, b"hello");

    client.disconnect().await;
    let _ = server
        .expect_event(|e| matches!(e, Event::Log(text) if text.contains("disconnect")))
        .await;
    server.listener.stop().await;
}

#[tokio::test]
async fn disallowed_file_rejected_before_the_wire() {
    let mut server = TestServer::start("txt").await;
    let (mut client, _events) = connected_client(server.addr()).await;

    let staging = tempfile::tempdir().unwrap();
    let path = staging.path().join("image.gif");
    std::fs::write(&path, b"GIF89a").unwrap();
    let err = client.send_file(&path).await.unwrap_err();
    assert!(
        matches!(err, ClientError::ExtensionRejected(ref ext) if ext == "gif"),
        "{err}"
    );
    assert!(!server.dir.path().join("image.gif").exists());

    client.disconnect().await;
    server.listener.stop().await;
}

/// A client that skips the pre-flight check (nothing stops a peer from
/// doing so) gets the rejection notice from the server instead.
#[tokio::test]
async fn server_rejects_disallowed_file_from_raw_socket() {
    let mut server = TestServer::start("txt").await;
    let mut socket = TcpStream::connect(server.addr()).await.unwrap();

    // Handshake
    assert_eq!(
        TransferMessage::read_from(&mut socket).await.unwrap(),
        Some(TransferMessage::Control(ControlNotice::PolicyList(
            ExtensionSet::normalize("txt")
        )))
    );
    assert_eq!(
        TransferMessage::read_from(&mut socket).await.unwrap(),
        Some(TransferMessage::Control(ControlNotice::ServerReady))
    );

    TransferMessage::File {
        filename: "image.gif".into(),
        data: vec![1, 2, 3],
    }
    .write_to(&mut socket)
    .await
    .unwrap();
    assert_eq!(
        TransferMessage::read_from(&mut socket).await.unwrap(),
        Some(TransferMessage::Control(ControlNotice::ExtensionError(
            "gif".into()
        )))
    );
    assert!(!server.dir.path().join("image.gif").exists());

    // The session survives the rejection.
    TransferMessage::Text {
        body: "still here".into(),
    }
    .write_to(&mut socket)
    .await
    .unwrap();
    let event = server
        .expect_event(|e| matches!(e, Event::InboundText(_)))
        .await;
    assert_eq!(event, Event::InboundText("still here".into()));

    TransferMessage::Control(ControlNotice::Shutdown)
        .write_to(&mut socket)
        .await
        .unwrap();
    server.listener.stop().await;
}

#[tokio::test]
async fn second_client_is_turned_away_until_the_first_leaves() {
    let mut server = TestServer::start("txt").await;
    let (mut first, _events) = connected_client(server.addr()).await;

    // While the first session is active, a second connection gets a busy
    // notice and then EOF; no handshake, no session.
    let mut second = TcpStream::connect(server.addr()).await.unwrap();
    assert_eq!(
        TransferMessage::read_from(&mut second).await.unwrap(),
        Some(TransferMessage::Control(ControlNotice::Busy))
    );
    assert_eq!(TransferMessage::read_from(&mut second).await.unwrap(), None);
    drop(second);

    // Once the first disconnects, the next client is admitted normally.
    first.disconnect().await;
    let _ = server
        .expect_event(|e| matches!(e, Event::Log(text) if text.contains("connection closed")))
        .await;

    let (mut third, _events) = connected_client(server.addr()).await;
    third.send_text("back in business").await.unwrap();
    let event = server
        .expect_event(|e| matches!(e, Event::InboundText(_)))
        .await;
    assert_eq!(event, Event::InboundText("back in business".into()));

    third.disconnect().await;
    server.listener.stop().await;
}

#[tokio::test]
async fn stopping_the_server_closes_an_open_session() {
    let server = TestServer::start("txt").await;
    let (controller, mut events) = connected_client(server.addr()).await;

    server.listener.stop().await;

    // The client's listen task observes the close and disconnects.
    loop {
        let event = tokio::time::timeout(DEADLINE, events.recv())
            .await
            .expect("timed out waiting for the client to notice")
            .expect("client event channel closed");
        if event == Event::ConnectionState(ConnectionState::Disconnected) {
            break;
        }
    }
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}
