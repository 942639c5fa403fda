//! Wire protocol definitions
// (c) 2025 Ross Younger
//!
//! The fling protocol is a thin framing layer over one TCP connection:
//! each message is a tagged, length-prefixed frame (see [`common`]),
//! and the message vocabulary is the [`TransferMessage`] sum type
//! (see [`transfer`]).

pub mod common;
pub mod transfer;

pub use common::{ProtocolError, ReceivingStream, SendReceivePair, SendingStream};
pub use transfer::{ControlNotice, TransferMessage};

/// The TCP port used when none is specified
pub const DEFAULT_PORT: u16 = 12345;
