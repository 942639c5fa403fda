// (c) 2025 Ross Younger

//! fling sends short text messages and files from one machine to another
//! over a plain TCP connection, with the receiving side enforcing a
//! file-type policy.
//!
//! ## Overview
//! - 📨 One binary, two modes: `fling serve` receives, `fling send` transmits
//! - 🛂 The server decides which file extensions it will accept and
//!   announces its allow-set to every client as soon as it connects
//! - 🙋 One client at a time: a second connection is turned away with a
//!   busy notice rather than queued
//! - 📁 Received files land in a destination directory of the operator's
//!   choosing; filenames are checked so a client cannot write outside it
//!
//! ## How it works
//! 1. The server listens on a TCP port (12345 by default)
//! 1. A client connects; the server sends its file-type allow-set, then a
//!    ready notice
//! 1. The client sends any mixture of text messages and files, each as a
//!    tagged length-prefixed frame (see [protocol])
//! 1. The server stores acceptable files, rejects the rest with an error
//!    notice, and keeps the session open either way
//! 1. The client announces shutdown and disconnects; the server is then
//!    free to admit the next client
//!
//! The library layer is UI-free. Both [server] and [client] report
//! progress as [events](events) for whatever shell is wrapping them;
//! the bundled CLI renders them as log lines.

mod cli;
pub use cli::cli;

pub mod client;
pub mod events;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod session;
pub mod util;
