//! HandshakeV10 greeting decoder.

use adaptsql_core::Result;
use adaptsql_core::error::protocol_error;
use serde::Serialize;

use crate::auth::plugins;
use crate::protocol::PacketReader;

/// Length of the scramble used by every supported auth plugin.
pub const SALT_LEN: usize = 20;

/// The server's first packet, plus what the client knows about the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub server_caps: u32,
    pub auth_plugin: String,
    pub version_text: String,
    /// First 20 bytes of `salt1 ++ salt2`
    #[serde(skip)]
    pub salt: Vec<u8>,
    pub connection_id: u32,
    pub charset: Option<u8>,
    pub status_flags: Option<u16>,
    /// Target host is the loopback interface
    pub is_localhost: bool,
    /// The connection URL asked for TLS
    pub url_wants_tls: bool,
}

impl Greeting {
    /// Decode a HandshakeV10 payload.
    ///
    /// Fields are read in strict offset order. Everything after the low
    /// capability word is optional: a pre-4.1 server may stop there.
    pub fn parse(payload: &[u8], is_localhost: bool, url_wants_tls: bool) -> Result<Self> {
        let mut reader = PacketReader::new(payload);

        let protocol = reader
            .read_u8()
            .ok_or_else(|| protocol_error("empty greeting packet"))?;
        if protocol == 0xFF {
            let err = reader.parse_err_packet();
            return Err(protocol_error(match err {
                Some(e) => format!(
                    "server refused connection: {} ({})",
                    e.error_message, e.error_code
                ),
                None => "server refused connection".to_string(),
            }));
        }
        if protocol != 10 {
            return Err(protocol_error(format!(
                "unsupported handshake protocol version {protocol}"
            )));
        }

        let version_text = reader
            .read_terminated_string()
            .ok_or_else(|| protocol_error("greeting truncated in server version"))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("greeting truncated in connection id"))?;
        let salt1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("greeting truncated in auth data"))?;
        if !reader.skip(1) {
            return Err(protocol_error("greeting truncated in filler"));
        }
        let caps_low = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("greeting truncated in capability flags"))?;

        let mut charset = None;
        let mut status_flags = None;
        let mut caps_high = 0u16;
        let mut salt = salt1.to_vec();
        let mut auth_plugin = String::new();

        if !reader.is_empty() {
            charset = reader.read_u8();
            status_flags = reader.read_u16_le();
            caps_high = reader.read_u16_le().unwrap_or(0);
            let auth_len = usize::from(reader.read_u8().unwrap_or(0));
            reader.skip(10);
            let salt2_len = auth_len.saturating_sub(8).max(13);
            salt.extend_from_slice(reader.read_up_to(salt2_len));
            if !reader.is_empty() {
                auth_plugin = reader.read_null_string().unwrap_or_default();
            }
        }

        salt.truncate(SALT_LEN);
        if auth_plugin.is_empty() {
            auth_plugin = plugins::MYSQL_NATIVE_PASSWORD.to_string();
        }

        Ok(Self {
            server_caps: u32::from(caps_low) | (u32::from(caps_high) << 16),
            auth_plugin,
            version_text,
            salt,
            connection_id,
            charset,
            status_flags,
            is_localhost,
            url_wants_tls,
        })
    }

    pub fn server_supports(&self, flag: u32) -> bool {
        self.server_caps & flag != 0
    }
}
