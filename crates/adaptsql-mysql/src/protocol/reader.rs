//! Bounds-checked cursor over one server payload.
//!
//! Fixed-width reads return `None` on truncation; the cursor is left where
//! it was. Row values go through [`PacketReader::read_text_value`], which
//! turns truncation into a protocol error carrying the offset.

use adaptsql_core::Result;
use adaptsql_core::error::protocol_error;

use crate::protocol::{ErrPacket, OkPacket};

/// Decode a length-encoded integer at the start of `buf`.
///
/// Returns the value and how many bytes it occupied. The NULL marker
/// (`0xFB`), the reserved `0xFF` and a short buffer all give `None`.
pub fn decode_lenenc_int(buf: &[u8]) -> Option<(u64, usize)> {
    let mut reader = PacketReader::new(buf);
    let value = reader.read_lenenc_int()?;
    Some((value, reader.pos))
}

#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.rest().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rest().is_empty()
    }

    fn peek(&self) -> Option<u8> {
        self.rest().first().copied()
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        bytes.try_into().ok()
    }

    /// Little-endian integer of `width` bytes (at most 8).
    fn read_uint(&mut self, width: usize) -> Option<u64> {
        let bytes = self.read_bytes(width)?;
        let mut le = [0u8; 8];
        le[..width].copy_from_slice(bytes);
        Some(u64::from_le_bytes(le))
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let start = self.pos;
        let value = match self.read_u8()? {
            b @ 0x00..=0xFA => Some(u64::from(b)),
            0xFC => self.read_uint(2),
            0xFD => self.read_uint(3),
            0xFE => self.read_uint(8),
            0xFB | 0xFF => None,
        };
        if value.is_none() {
            self.pos = start;
        }
        value
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len).map(lossy)
    }

    /// One text-protocol column value; `Ok(None)` is SQL NULL.
    ///
    /// A `0xFF` prefix or a length running past the payload is an error
    /// here rather than `None`, so NULL never hides corruption.
    pub fn read_text_value(&mut self) -> Result<Option<&'a [u8]>> {
        let offset = self.pos;
        match self.peek() {
            None => return Err(protocol_error(format!("row truncated at offset {offset}"))),
            Some(0xFB) => {
                self.pos += 1;
                return Ok(None);
            }
            Some(0xFF) => {
                return Err(protocol_error(format!(
                    "malformed length prefix 0xff at offset {offset}"
                )));
            }
            Some(_) => {}
        }
        let len = self
            .read_lenenc_int()
            .and_then(|l| usize::try_from(l).ok())
            .ok_or_else(|| protocol_error(format!("truncated length prefix at offset {offset}")))?;
        match self.read_bytes(len) {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(protocol_error(format!(
                "value at offset {offset} declares {len} bytes, {} remain",
                self.remaining()
            ))),
        }
    }

    /// NUL-terminated string; without a terminator it takes the rest.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = self.rest();
        let end = rest.iter().position(|&b| b == 0);
        let text = &rest[..end.unwrap_or(rest.len())];
        self.pos += end.map_or(rest.len(), |e| e + 1);
        Some(lossy(text))
    }

    /// NUL-terminated string that must have its terminator.
    pub fn read_terminated_string(&mut self) -> Option<String> {
        let rest = self.rest();
        let end = rest.iter().position(|&b| b == 0)?;
        self.pos += end + 1;
        Some(lossy(&rest[..end]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.rest().get(..len)?;
        self.pos += len;
        Some(bytes)
    }

    /// At most `len` bytes; short when the payload ends first.
    pub fn read_up_to(&mut self, len: usize) -> &'a [u8] {
        let rest = self.rest();
        let bytes = &rest[..len.min(rest.len())];
        self.pos += bytes.len();
        bytes
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.pos = self.data.len();
        rest
    }

    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    /// OK packet: optional `0x00` marker, affected rows and last insert id
    /// as lenenc ints, then status and warning words and an info string.
    /// The trailing fields default when a terse server omits them.
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        if self.peek() == Some(0x00) {
            self.pos += 1;
        }
        Some(OkPacket {
            affected_rows: self.read_lenenc_int()?,
            last_insert_id: self.read_lenenc_int()?,
            status_flags: self.read_u16_le().unwrap_or_default(),
            warnings: self.read_u16_le().unwrap_or_default(),
            info: lossy(self.read_rest()),
        })
    }

    /// ERR packet: optional `0xFF` marker, a code word, an optional
    /// `#`-prefixed five-byte SQLSTATE and the message.
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.pos += 1;
        }
        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.pos += 1;
            lossy(self.read_bytes(5)?)
        } else {
            String::new()
        };
        Some(ErrPacket {
            error_code,
            sql_state,
            error_message: lossy(self.read_rest()),
        })
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
