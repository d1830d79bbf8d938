/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Connection] over a [TcpStream].
//!
//! Each message travels as one frame: a 4-byte little-endian length, followed by that many bytes of the
//! borsh encoding of the [Message].

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{Connection, Connector, TransportError};
use crate::messages::Message;
use crate::types::basic::Location;

/// Frames longer than this are rejected before their body is read.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A [TcpStream] split into independently locked read and write halves, so that one thread can block
/// in `recv` while another sends.
pub struct TcpConnection {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    control: TcpStream,
    peer_addr: Option<SocketAddr>,
}

impl TcpConnection {
    pub fn new(tcp_stream: TcpStream) -> Result<TcpConnection, TransportError> {
        tcp_stream.set_nodelay(true)?;
        Ok(TcpConnection {
            reader: Mutex::new(tcp_stream.try_clone()?),
            writer: Mutex::new(tcp_stream.try_clone()?),
            peer_addr: tcp_stream.peer_addr().ok(),
            control: tcp_stream,
        })
    }
}

impl Connection for TcpConnection {
    fn send(&self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        let mut writer = self
            .writer
            .lock()
            .expect("Programming error: connection writer lock poisoned.");
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    fn recv(&self) -> Result<Message, TransportError> {
        let mut reader = self
            .reader
            .lock()
            .expect("Programming error: connection reader lock poisoned.");
        read_frame(&mut *reader)
    }

    fn close(&self) {
        // Fails only if the socket is already shut down.
        let _ = self.control.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        match self.peer_addr {
            Some(addr) => addr.to_string(),
            None => String::from("unknown"),
        }
    }
}

/// Opens a new [TcpConnection] per call.
#[derive(Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Option<Duration>) -> TcpConnector {
        TcpConnector { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, location: &Location) -> Result<Arc<dyn Connection>, TransportError> {
        let tcp_stream = match self.connect_timeout {
            Some(timeout) => {
                let addr = (location.host.as_str(), location.port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or(TransportError::Closed)?;
                TcpStream::connect_timeout(&addr, timeout)?
            }
            None => TcpStream::connect((location.host.as_str(), location.port))?,
        };
        Ok(Arc::new(TcpConnection::new(tcp_stream)?))
    }
}

pub(crate) fn encode_frame(message: &Message) -> Result<Vec<u8>, TransportError> {
    let body = message.try_to_vec()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub(crate) fn read_frame(reader: &mut impl Read) -> Result<Message, TransportError> {
    let len = {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        u32::from_le_bytes(buf) as usize
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let body = {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        buf
    };
    Message::try_from_slice(&body).map_err(|error| TransportError::Decode(error.to_string()))
}
