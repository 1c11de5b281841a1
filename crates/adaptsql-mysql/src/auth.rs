//! MySQL authentication strategies and the pack-driven registry.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Only offered over an encrypted channel, where the password is sent in
//! cleartext. The SHA-256 fast-auth scramble is still computed when the
//! server switches a plaintext session to this plugin and the credential
//! is cached server-side.

use adaptsql_core::error::{auth_error, protocol_error};
use adaptsql_core::{Result, WirePack};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::protocol::{CLIENT_MAX_PACKET, PacketWriter, capabilities};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
}

/// Second byte of a `0x01` "more data" packet during caching_sha2 auth.
pub mod caching_sha2 {
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// `SHA1(password) XOR SHA1(salt ++ SHA1(SHA1(password)))`, 20 bytes.
///
/// An empty password yields an empty response, as the server expects.
pub fn scramble_native(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &salt[..salt.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) ++ salt)`, 32 bytes.
pub fn scramble_caching_sha2(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &salt[..salt.len().min(20)];

    let hash1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let hash2: [u8; 32] = Sha256::digest(hash1).into();
    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(seed);
    let hash3: [u8; 32] = hasher.finalize().into();

    hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
}

/// Password followed by a NUL, the reply to a server asking for cleartext.
pub fn cleartext_response(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// A supported authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlgo {
    NativePassword,
    CachingSha2,
}

impl AuthAlgo {
    pub fn from_plugin(name: &str) -> Option<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Some(AuthAlgo::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Some(AuthAlgo::CachingSha2),
            _ => None,
        }
    }

    pub const fn plugin_name(self) -> &'static str {
        match self {
            AuthAlgo::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthAlgo::CachingSha2 => plugins::CACHING_SHA2_PASSWORD,
        }
    }

    /// Auth data for the handshake response.
    pub fn initial_response(self, password: &str, salt: &[u8], encrypted: bool) -> Result<Vec<u8>> {
        match self {
            AuthAlgo::NativePassword => Ok(scramble_native(password, salt)),
            AuthAlgo::CachingSha2 if encrypted => Ok(password.as_bytes().to_vec()),
            AuthAlgo::CachingSha2 => Err(auth_error(
                "caching_sha2_password requires an encrypted channel",
            )),
        }
    }

    /// Auth data after the server switched a plaintext session to this plugin.
    pub fn switch_response(self, password: &str, salt: &[u8]) -> Vec<u8> {
        match self {
            AuthAlgo::NativePassword => scramble_native(password, salt),
            AuthAlgo::CachingSha2 => scramble_caching_sha2(password, salt),
        }
    }
}

/// One registry entry, in pack order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCandidate {
    pub algo: AuthAlgo,
    /// The pack lists this plugin under `tlsRequiredFor`
    pub requires_tls: bool,
}

/// The pack's ordered auth algorithms, restricted to the ones implemented here.
#[derive(Debug, Clone, Default)]
pub struct AuthRegistry {
    candidates: Vec<AuthCandidate>,
}

impl AuthRegistry {
    pub fn from_pack(pack: &WirePack) -> Self {
        let candidates = pack
            .handshake
            .auth
            .algos
            .iter()
            .filter_map(|name| {
                let Some(algo) = AuthAlgo::from_plugin(name) else {
                    tracing::debug!(plugin = %name, pack = %pack.name, "skipping unknown auth plugin");
                    return None;
                };
                Some(AuthCandidate {
                    algo,
                    requires_tls: pack.tls_required_for(name),
                })
            })
            .collect();
        Self { candidates }
    }

    pub fn candidates(&self) -> &[AuthCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Build a HandshakeResponse41 payload.
pub fn build_handshake_response(
    caps: u32,
    charset: u8,
    user: &str,
    auth_response: &[u8],
    database: Option<&str>,
    plugin: &str,
) -> Result<Vec<u8>> {
    let mut writer = PacketWriter::new();
    writer.write_u32_le(caps);
    writer.write_u32_le(CLIENT_MAX_PACKET);
    writer.write_u8(charset);
    writer.write_zeros(23);
    writer.write_null_string(user);

    if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        writer.write_lenenc_bytes(auth_response);
    } else {
        let len = u8::try_from(auth_response.len())
            .map_err(|_| protocol_error("auth response longer than 255 bytes"))?;
        writer.write_u8(len);
        writer.write_bytes(auth_response);
    }

    if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(database.unwrap_or_default());
    }
    if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(plugin);
    }
    if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
        let mut attrs = PacketWriter::with_capacity(64);
        attrs.write_lenenc_string("_client_name");
        attrs.write_lenenc_string("adaptsql");
        attrs.write_lenenc_string("_client_version");
        attrs.write_lenenc_string(env!("CARGO_PKG_VERSION"));
        writer.write_lenenc_bytes(attrs.as_bytes());
    }

    Ok(writer.into_bytes())
}
