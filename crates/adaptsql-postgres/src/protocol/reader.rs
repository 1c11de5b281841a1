//! PostgreSQL message decoder.
//!
//! Bytes from the socket are fed in as they arrive; complete messages are
//! drained one at a time. A message split across reads stays buffered.

use adaptsql_core::Result;
use adaptsql_core::error::protocol_error;

use super::{
    BackendMessage, ErrorFields, MAX_MESSAGE_LEN, TransactionStatus, auth_code, backend_type,
};

#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet part of a decoded message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete message, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        let tag = self.buf[0];
        let declared = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        let len = usize::try_from(declared)
            .ok()
            .filter(|&n| (4..=MAX_MESSAGE_LEN).contains(&n))
            .ok_or_else(|| {
                protocol_error(format!(
                    "invalid length {declared} for message '{}'",
                    char::from(tag)
                ))
            })?;
        if self.buf.len() < len + 1 {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..=len).collect();
        decode(tag, &frame[5..]).map(Some)
    }
}

/// Big-endian cursor over one message body.
struct Body<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Body<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(protocol_error("message body truncated"));
        }
        let data = self.data;
        let out = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        let b = self.bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> Result<String> {
        let data = self.data;
        let rest = &data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| protocol_error("unterminated string in message body"))?;
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    fn rest(&mut self) -> &'a [u8] {
        let data = self.data;
        let out = &data[self.pos..];
        self.pos = data.len();
        out
    }
}

fn decode(tag: u8, body: &[u8]) -> Result<BackendMessage> {
    let mut b = Body::new(body);
    let msg = match tag {
        backend_type::AUTHENTICATION => match b.i32()? {
            auth_code::OK => BackendMessage::AuthenticationOk,
            auth_code::CLEARTEXT => BackendMessage::AuthenticationCleartextPassword,
            auth_code::MD5 => {
                let salt = b.bytes(4)?;
                BackendMessage::AuthenticationMD5Password([salt[0], salt[1], salt[2], salt[3]])
            }
            auth_code::SASL => {
                let mut mechanisms = Vec::new();
                while b.remaining() > 0 {
                    let name = b.cstr()?;
                    if name.is_empty() {
                        break;
                    }
                    mechanisms.push(name);
                }
                BackendMessage::AuthenticationSASL(mechanisms)
            }
            auth_code::SASL_CONTINUE => BackendMessage::AuthenticationSASLContinue(b.rest().to_vec()),
            auth_code::SASL_FINAL => BackendMessage::AuthenticationSASLFinal(b.rest().to_vec()),
            other => BackendMessage::AuthenticationOther(other),
        },
        backend_type::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: b.i32()?,
            secret_key: b.i32()?,
        },
        backend_type::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: b.cstr()?,
            value: b.cstr()?,
        },
        backend_type::READY_FOR_QUERY => {
            let status = b.u8()?;
            BackendMessage::ReadyForQuery(TransactionStatus::from_byte(status).ok_or_else(
                || protocol_error(format!("unknown transaction status 0x{status:02x}")),
            )?)
        }
        backend_type::ROW_DESCRIPTION => {
            let count = b.i16()?;
            let mut names = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
            for _ in 0..count {
                names.push(b.cstr()?);
                // table oid, column attr, type oid, type size, type modifier, format
                b.bytes(18)?;
            }
            BackendMessage::RowDescription(names)
        }
        backend_type::DATA_ROW => {
            let count = b.i16()?;
            let mut values = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
            for _ in 0..count {
                let len = b.i32()?;
                if len < 0 {
                    values.push(None);
                } else {
                    let len = usize::try_from(len).map_err(|_| protocol_error("bad value length"))?;
                    values.push(Some(b.bytes(len)?.to_vec()));
                }
            }
            BackendMessage::DataRow(values)
        }
        backend_type::COMMAND_COMPLETE => BackendMessage::CommandComplete(b.cstr()?),
        backend_type::EMPTY_QUERY => BackendMessage::EmptyQueryResponse,
        backend_type::ERROR_RESPONSE => BackendMessage::ErrorResponse(error_fields(&mut b)?),
        backend_type::NOTICE_RESPONSE => BackendMessage::NoticeResponse(error_fields(&mut b)?),
        other => BackendMessage::Other(other),
    };
    Ok(msg)
}

fn error_fields(b: &mut Body<'_>) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    while b.remaining() > 0 {
        let code = b.u8()?;
        if code == 0 {
            break;
        }
        let value = b.cstr()?;
        match code {
            b'S' => fields.severity = value,
            // 'V' is the non-localized severity (9.6+)
            b'V' => {
                if fields.severity.is_empty() {
                    fields.severity = value;
                }
            }
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}
