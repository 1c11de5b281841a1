//! Authentication methods the client will answer.
//!
//! The server picks the method; the wire pack's ordered `algos` list is the
//! set the client agrees to, and `tlsRequiredFor` names the methods that may
//! only run over an encrypted channel.

pub mod scram;

use adaptsql_core::WirePack;

pub use scram::ScramClient;

/// A method the server may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Cleartext,
    Md5,
    ScramSha256,
}

impl AuthMethod {
    /// Name as used in the wire pack.
    pub const fn pack_name(self) -> &'static str {
        match self {
            AuthMethod::Cleartext => "password",
            AuthMethod::Md5 => "md5",
            AuthMethod::ScramSha256 => "scram-sha-256",
        }
    }
}

/// Allowed methods taken from a wire pack.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    allowed: Vec<(AuthMethod, bool)>,
}

impl AuthPolicy {
    pub fn from_pack(pack: &WirePack) -> Self {
        let allowed = pack
            .handshake
            .auth
            .algos
            .iter()
            .filter_map(|name| {
                let method = match name.as_str() {
                    "password" | "cleartext" => AuthMethod::Cleartext,
                    "md5" => AuthMethod::Md5,
                    "scram-sha-256" => AuthMethod::ScramSha256,
                    other => {
                        tracing::debug!(method = other, "ignoring unknown auth method in wire pack");
                        return None;
                    }
                };
                Some((method, pack.tls_required_for(name)))
            })
            .collect();
        Self { allowed }
    }

    /// `None` when the pack does not list the method; otherwise whether it needs TLS.
    pub fn requires_tls(&self, method: AuthMethod) -> Option<bool> {
        self.allowed
            .iter()
            .find(|(m, _)| *m == method)
            .map(|&(_, tls)| tls)
    }
}

/// `"md5" + md5(md5(password + user) + salt)` in lowercase hex.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}").as_bytes());
    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(&outer_input))
}
