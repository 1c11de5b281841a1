//! Client capability advisor.
//!
//! The one place where the TLS decision for a MySQL connection is made.
//! Pure: no I/O, no clock, no environment.

use adaptsql_core::Policy;

use crate::handshake::Greeting;
use crate::protocol::capabilities::{
    BASELINE, CLIENT_CONNECT_WITH_DB, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION, CLIENT_SSL,
};

/// Bits sent even when the server word omits them; the response layout depends on them.
const REQUIRED: u32 = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;

/// Derive the client capability word for a greeting under a policy.
///
/// The baseline (plus `CONNECT_WITH_DB` when a database is named) is masked
/// by what the server advertises. `CLIENT_SSL` is set exactly when the URL
/// asked for TLS or the policy forces it for this host; it is never masked,
/// so a server without TLS support is caught by the caller instead of
/// silently downgrading.
pub fn propose_client_caps(greeting: &Greeting, policy: &Policy, with_database: bool) -> u32 {
    let mut wanted = BASELINE;
    if with_database {
        wanted |= CLIENT_CONNECT_WITH_DB;
    }

    let mut caps = (wanted & greeting.server_caps) | REQUIRED;
    if greeting.url_wants_tls || policy.forces_tls(greeting.is_localhost) {
        caps |= CLIENT_SSL;
    }
    caps
}

/// Does the word ask for a TLS upgrade?
pub const fn wants_tls(caps: u32) -> bool {
    caps & CLIENT_SSL != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::{CLIENT_CONNECT_ATTRS, CLIENT_PLUGIN_AUTH};

    fn greeting(is_localhost: bool, url_wants_tls: bool) -> Greeting {
        Greeting {
            server_caps: 0xFFFF_FFFF,
            auth_plugin: "mysql_native_password".to_string(),
            version_text: "8.0.36".to_string(),
            salt: vec![0; 20],
            connection_id: 1,
            charset: Some(45),
            status_flags: Some(2),
            is_localhost,
            url_wants_tls,
        }
    }

    fn strict() -> Policy {
        Policy::default().require_tls_for_remote(true)
    }

    #[test]
    fn test_localhost_never_forced_into_tls() {
        let caps = propose_client_caps(&greeting(true, false), &strict(), false);
        assert!(!wants_tls(caps));
    }

    #[test]
    fn test_remote_forced_into_tls() {
        let caps = propose_client_caps(&greeting(false, false), &strict(), false);
        assert!(wants_tls(caps));
    }

    #[test]
    fn test_url_request_sets_tls_on_localhost() {
        let caps = propose_client_caps(&greeting(true, true), &strict(), false);
        assert!(wants_tls(caps));
    }

    #[test]
    fn test_relaxed_policy_remote_plaintext() {
        let policy = Policy::default().require_tls_for_remote(false);
        let caps = propose_client_caps(&greeting(false, false), &policy, false);
        assert!(!wants_tls(caps));
    }

    #[test]
    fn test_localhost_forced_when_plain_localhost_disallowed() {
        let policy = strict().allow_plain_localhost(false);
        let caps = propose_client_caps(&greeting(true, false), &policy, false);
        assert!(wants_tls(caps));
    }

    #[test]
    fn test_tls_bit_not_masked_by_server() {
        let mut g = greeting(false, false);
        g.server_caps = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;
        let caps = propose_client_caps(&g, &strict(), true);
        assert!(wants_tls(caps));
        assert_eq!(caps & CLIENT_PLUGIN_AUTH, 0);
        assert_eq!(caps & CLIENT_CONNECT_WITH_DB, 0);
    }

    #[test]
    fn test_baseline_and_database_bits() {
        let policy = Policy::default().require_tls_for_remote(false);
        let caps = propose_client_caps(&greeting(true, false), &policy, true);
        for bit in [
            CLIENT_PROTOCOL_41,
            CLIENT_SECURE_CONNECTION,
            CLIENT_PLUGIN_AUTH,
            CLIENT_CONNECT_ATTRS,
            CLIENT_CONNECT_WITH_DB,
        ] {
            assert_ne!(caps & bit, 0, "bit {bit:#x}");
        }
        let without_db = propose_client_caps(&greeting(true, false), &policy, false);
        assert_eq!(without_db & CLIENT_CONNECT_WITH_DB, 0);
    }

    #[test]
    fn test_deterministic() {
        let g = greeting(false, false);
        let p = strict();
        assert_eq!(
            propose_client_caps(&g, &p, true),
            propose_client_caps(&g, &p, true)
        );
    }
}
