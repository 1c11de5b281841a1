//! PostgreSQL message encoder.
//!
//! All multi-byte integers are written in big-endian (network) byte order.

#![allow(clippy::cast_possible_truncation)]

use super::{FrontendMessage, SSL_REQUEST_CODE, frontend_type};

#[derive(Debug, Clone, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode `msg`, replacing whatever the buffer held before.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();

        match msg {
            FrontendMessage::Startup { version, params } => self.write_startup(*version, params),
            FrontendMessage::PasswordMessage(password) => {
                self.write_string_message(frontend_type::PASSWORD, password);
            }
            FrontendMessage::SASLInitialResponse { mechanism, data } => {
                self.write_sasl_initial(mechanism, data);
            }
            FrontendMessage::SASLResponse(data) => {
                self.buf.push(frontend_type::PASSWORD);
                self.push_len(data.len() + 4);
                self.buf.extend_from_slice(data);
            }
            FrontendMessage::Query(query) => self.write_string_message(frontend_type::QUERY, query),
            FrontendMessage::Terminate => {
                self.buf.push(frontend_type::TERMINATE);
                self.push_len(4);
            }
            FrontendMessage::SSLRequest => {
                self.push_len(8);
                self.buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
            }
        }

        &self.buf
    }

    /// Startup carries no type byte.
    fn write_startup(&mut self, version: i32, params: &[(String, String)]) {
        let body_len: usize = 4
            + params
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>()
            + 1;
        self.push_len(body_len + 4);
        self.buf.extend_from_slice(&version.to_be_bytes());
        for (key, value) in params {
            self.push_cstr(key);
            self.push_cstr(value);
        }
        self.buf.push(0);
    }

    fn write_sasl_initial(&mut self, mechanism: &str, data: &[u8]) {
        self.buf.push(frontend_type::PASSWORD);
        self.push_len(4 + mechanism.len() + 1 + 4 + data.len());
        self.push_cstr(mechanism);
        if data.is_empty() {
            self.buf.extend_from_slice(&(-1_i32).to_be_bytes());
        } else {
            self.push_len(data.len());
            self.buf.extend_from_slice(data);
        }
    }

    fn write_string_message(&mut self, type_byte: u8, s: &str) {
        self.buf.push(type_byte);
        self.push_len(s.len() + 5);
        self.push_cstr(s);
    }

    fn push_len(&mut self, len: usize) {
        self.buf.extend_from_slice(&(len as i32).to_be_bytes());
    }

    fn push_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    #[test]
    fn test_startup_message() {
        let mut writer = MessageWriter::new();
        let data = writer
            .write(&FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: vec![("user".to_string(), "app".to_string())],
            })
            .to_vec();

        let len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        assert_eq!(len, data.len());
        assert_eq!(&data[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&data[8..], b"user\0app\0\0");
    }

    #[test]
    fn test_query_message() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::Query("SELECT 1".to_string()));
        assert_eq!(data[0], b'Q');
        let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        assert_eq!(len, 4 + 8 + 1);
        assert_eq!(data[len], 0);
    }

    #[test]
    fn test_terminate_and_ssl_request() {
        let mut writer = MessageWriter::new();
        assert_eq!(writer.write(&FrontendMessage::Terminate), &[b'X', 0, 0, 0, 4]);
        assert_eq!(
            writer.write(&FrontendMessage::SSLRequest),
            &[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F]
        );
    }

    #[test]
    fn test_sasl_initial_response() {
        let mut writer = MessageWriter::new();
        let data = writer
            .write(&FrontendMessage::SASLInitialResponse {
                mechanism: "SCRAM-SHA-256".to_string(),
                data: b"n,,n=,r=abc".to_vec(),
            })
            .to_vec();
        assert_eq!(data[0], b'p');
        let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        assert_eq!(len + 1, data.len());
        assert_eq!(&data[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(&data[19..23], &11_i32.to_be_bytes());
        assert_eq!(&data[23..], b"n,,n=,r=abc");
    }
}
