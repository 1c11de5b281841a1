//! MySQL packet layer: framing, capability bits and the generic
//! OK / ERR / EOF packets every command can answer with.
//!
//! Every packet is a 3-byte little-endian payload length plus a one-byte
//! sequence id, then the payload.

pub mod reader;
pub mod writer;

pub use reader::{PacketReader, decode_lenenc_int};
pub use writer::PacketWriter;

/// Largest payload one packet can carry; longer payloads continue in
/// further packets.
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// `max_packet_size` the client announces at login.
pub const CLIENT_MAX_PACKET: u32 = 1 << 24;

/// Capability bits exchanged in the greeting and the login response.
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Bits the advisor always asks for, before masking with the server word.
    pub const BASELINE: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_CONNECT_ATTRS;
}

/// Fallback command bytes for packs that do not name their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Quit = 0x01,
    Query = 0x03,
    Ping = 0x0e,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub payload_length: u32,
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let [a, b, c, sequence_id] = *bytes;
        Self {
            payload_length: u32::from_le_bytes([a, b, c, 0]),
            sequence_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [a, b, c, _] = self.payload_length.to_le_bytes();
        [a, b, c, self.sequence_id]
    }
}

/// How a server packet should be read, judged from its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ok,
    Error,
    Eof,
    /// `LOCAL INFILE` request; the transport refuses these.
    LocalInfile,
    /// Column count, column definition or row.
    Data,
}

impl PacketType {
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match (byte, payload_len) {
            (0x00, _) => Self::Ok,
            (0xFF, _) => Self::Error,
            // rows can open with an 8-byte lenenc (0xFE); EOF stays under 9 bytes
            (0xFE, 0..=8) => Self::Eof,
            (0xFB, _) => Self::LocalInfile,
            _ => Self::Data,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Empty when the server sent no `#` SQLSTATE marker.
    pub sql_state: String,
    pub error_message: String,
}
