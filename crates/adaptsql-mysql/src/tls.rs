//! CLIENT_SSL negotiation.
//!
//! The client answers the greeting with a 32-byte SSLRequest carrying the
//! capability word, then both sides run a TLS handshake on the same socket.
//! The handshake response follows inside the TLS session with the next
//! sequence id.

use adaptsql_core::error::tls_error;
use adaptsql_core::{ConnectUrl, Result, TlsInfo, WirePack};

use crate::codec::PacketCodec;
use crate::handshake::Greeting;
use crate::protocol::{CLIENT_MAX_PACKET, PacketWriter, capabilities};

/// SSLRequest payload: caps (with the SSL bit), max packet, charset, 23 zeros.
pub fn build_ssl_request(client_caps: u32, ssl_flag: u32, charset: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | ssl_flag);
    writer.write_u32_le(CLIENT_MAX_PACKET);
    writer.write_u8(charset);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// Send the SSLRequest and wrap the socket in TLS.
pub fn negotiate(
    codec: &mut PacketCodec,
    pack: &WirePack,
    greeting: &Greeting,
    client_caps: u32,
    url: &ConnectUrl,
) -> Result<TlsInfo> {
    if !greeting.server_supports(capabilities::CLIENT_SSL) {
        codec.shutdown();
        return Err(tls_error(format!(
            "TLS required but {}:{} does not advertise CLIENT_SSL",
            url.host,
            url.port_or(3306)
        )));
    }
    codec.write_packet(&build_ssl_request(
        client_caps,
        pack.caps.client_ssl_flag,
        pack.charset(),
    ))?;
    let info = codec.stream_mut().upgrade_tls(&url.host, url.ssl_mode);
    if info.is_err() {
        codec.shutdown();
    }
    info
}
