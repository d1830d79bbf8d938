/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable, connection-oriented transport.
//!
//! The runtime needs very little from its transport: open a connection to a [Location], send and receive
//! one framed [Message] at a time, and close. Every call uses a connection of its own, so connections
//! carry no multiplexing state. [tcp] provides the default implementation. Other implementations (for
//! example, in-memory channels in tests) can be plugged into a [Client](crate::client::Client) through a
//! [Connector] and into a [Server](crate::server::Server) through
//! [serve_connection](crate::server::Server::serve_connection).

pub mod tcp;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::Arc;

use crate::messages::Message;
use crate::types::basic::Location;

/// One bidirectional message connection.
///
/// `send` and `recv` may be called concurrently from different threads. `close` unblocks a pending
/// `recv`, which then returns [TransportError::Closed].
pub trait Connection: Send + Sync {
    /// Send a message. Blocks until the message is handed to the transport.
    fn send(&self, message: &Message) -> Result<(), TransportError>;

    /// Receive the next message, blocking until one arrives or the connection terminates.
    fn recv(&self) -> Result<Message, TransportError>;

    /// Terminate the connection in both directions. Idempotent.
    fn close(&self);

    /// Human-readable name of the remote end, for logs.
    fn peer(&self) -> String;
}

/// Opens connections to servers.
pub trait Connector: Send + Sync {
    fn connect(&self, location: &Location) -> Result<Arc<dyn Connection>, TransportError>;
}

#[derive(Debug)]
pub enum TransportError {
    /// The connection was closed by either end.
    Closed,
    Io(io::Error),
    /// A frame was received that does not decode into a [Message].
    Decode(String),
    /// A frame announced a length above [tcp::MAX_FRAME_LEN].
    FrameTooLarge(usize),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::Closed,
            _ => TransportError::Io(error),
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "connection closed"),
            TransportError::Io(error) => write!(f, "i/o error: {}", error),
            TransportError::Decode(message) => write!(f, "undecodable frame: {}", message),
            TransportError::FrameTooLarge(len) => write!(f, "frame of {} bytes is too large", len),
        }
    }
}

impl std::error::Error for TransportError {}
