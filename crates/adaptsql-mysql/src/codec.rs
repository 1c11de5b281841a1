//! Packet framing over a [`NetStream`].
//!
//! MySQL uses one sequence counter shared by both directions: every packet
//! read or written advances it, and each new command starts again at zero.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Write};

use adaptsql_core::error::{Error, ProtocolError, Result};
use adaptsql_core::stream::NetStream;

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, writer::frame_payload};

/// Length-prefixed framer with a rolling sequence number.
#[derive(Debug)]
pub struct PacketCodec {
    stream: NetStream,
    sequence_id: u8,
}

impl PacketCodec {
    pub fn new(stream: NetStream) -> Self {
        Self {
            stream,
            sequence_id: 0,
        }
    }

    /// Sequence id the next written packet will carry.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn stream(&self) -> &NetStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut NetStream {
        &mut self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// Release the socket. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }

    /// Block until one complete logical packet has arrived.
    ///
    /// Partial socket deliveries are accumulated; payloads split across
    /// 16MB frames are reassembled. Any failure tears the socket down.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let result = self.read_packet_inner();
        if result.is_err() {
            self.stream.shutdown();
        }
        result
    }

    fn read_packet_inner(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.stream
                .read_full(&mut header_buf)
                .map_err(|e| frame_error(e, "packet header"))?;
            let header = PacketHeader::from_bytes(&header_buf);
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            if len > 0 {
                self.stream
                    .read_full(&mut payload[start..])
                    .map_err(|e| frame_error(e, "packet payload"))?;
            }
            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        tracing::trace!(len = payload.len(), seq = self.sequence_id, "packet read");
        Ok(payload)
    }

    /// Frame `payload` with the current sequence id and send it.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (bytes, next) = frame_payload(payload, self.sequence_id);
        self.sequence_id = next;
        let result = self
            .stream
            .write_all(&bytes)
            .and_then(|()| self.stream.flush())
            .map_err(|e| frame_error(e, "packet write"));
        if result.is_err() {
            self.stream.shutdown();
        }
        tracing::trace!(len = payload.len(), seq = next, "packet written");
        result
    }
}

/// Socket failure while a frame is in flight.
///
/// Read deadlines stay [`Error::Timeout`]; everything else is a
/// protocol error, since the frame can never be completed.
fn frame_error(err: io::Error, what: &str) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::UnexpectedEof => Error::Protocol(ProtocolError {
            message: format!("connection closed before a full {what} was read"),
            raw_data: None,
            source: Some(Box::new(err)),
        }),
        _ => Error::Protocol(ProtocolError {
            message: format!("{what} failed: {err}"),
            raw_data: None,
            source: Some(Box::new(err)),
        }),
    }
}
