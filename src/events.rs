//! Status events emitted by the core for a presentation layer to render
// (c) 2025 Ross Younger
//!
//! The core never draws UI. Both the [server](crate::server) and the
//! [client](crate::client) report what happened over an unbounded channel
//! of [`Event`]s; the shell (here, the CLI) decides how to show them.

use crate::policy::ExtensionSet;

/// Client connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    /// No connection and none in progress
    Disconnected,
    /// TCP connect in flight
    Connecting,
    /// Session established
    Connected,
    /// Shutdown notice sent, transport closing
    Disconnecting,
}

/// A status notification from the core.
///
/// Events are advisory; dropping the receiving end never fails core
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Free-form progress or diagnostic text
    Log(String),
    /// The client connection state changed
    ConnectionState(ConnectionState),
    /// The server announced its allow-set
    PolicyReceived(ExtensionSet),
    /// A text message arrived (server side)
    InboundText(String),
    /// A file was received and persisted (server side)
    FileStored(String),
    /// The peer (or local pre-flight) rejected a send for this extension
    SendRejected(String),
}

/// The sending half of an event channel.
///
/// Wrapped so emitting is infallible: a closed or absent collaborator is
/// not an error.
#[derive(Debug, Clone)]
pub struct EventSender(tokio::sync::mpsc::UnboundedSender<Event>);

impl EventSender {
    /// Creates an event channel pair
    #[must_use]
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Emits an event, ignoring a departed collaborator
    pub fn emit(&self, event: Event) {
        let _ = self.0.send(event);
    }

    /// Emits a [`Event::Log`] event
    pub fn log(&self, text: impl Into<String>) {
        self.emit(Event::Log(text.into()));
    }
}
