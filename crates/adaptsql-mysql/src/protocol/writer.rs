//! Payload builder and packet framing.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// Growable payload for one client packet, before framing.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Length-encoded integer: one byte below 251, otherwise a
    /// 0xFC/0xFD/0xFE marker followed by 2, 3 or 8 little-endian bytes.
    pub fn write_lenenc_int(&mut self, value: u64) {
        let le = value.to_le_bytes();
        match value {
            0..=250 => self.buf.push(le[0]),
            251..=0xFFFF => {
                self.buf.push(0xFC);
                self.write_bytes(&le[..2]);
            }
            0x1_0000..=0xFF_FFFF => {
                self.buf.push(0xFD);
                self.write_bytes(&le[..3]);
            }
            _ => {
                self.buf.push(0xFE);
                self.write_bytes(&le);
            }
        }
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.write_bytes(data);
    }

    /// NUL-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.buf.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Filler bytes (the 23-byte reserved block of the login packets).
    pub fn write_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }
}

/// Wrap `payload` in packet headers starting at `sequence_id`.
///
/// Payloads of [`MAX_PACKET_SIZE`] bytes or more are split; a final chunk
/// of exactly the maximum is followed by an empty packet. Returns the
/// framed bytes and the sequence id the next packet should carry.
pub fn frame_payload(payload: &[u8], sequence_id: u8) -> (Vec<u8>, u8) {
    let chunks = payload.len() / MAX_PACKET_SIZE + 1;
    let mut framed = Vec::with_capacity(payload.len() + chunks * PacketHeader::SIZE);
    let mut seq = sequence_id;
    for i in 0..chunks {
        let start = i * MAX_PACKET_SIZE;
        let end = payload.len().min(start + MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: (end - start) as u32,
            sequence_id: seq,
        };
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(&payload[start..end]);
        seq = seq.wrapping_add(1);
    }
    (framed, seq)
}
