//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677), without channel binding.

use adaptsql_core::Result;
use adaptsql_core::error::{auth_error, protocol_error};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// One SCRAM exchange: client-first, server-first, client-final, server-final.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        let client_nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_nonce(password, client_nonce)
    }

    pub fn with_nonce(password: &str, client_nonce: impl Into<String>) -> Self {
        Self {
            password: password.to_string(),
            client_nonce: client_nonce.into(),
            salted_password: None,
            auth_message: None,
        }
    }

    /// The server takes the user from the startup packet, so `n=` stays empty.
    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.client_nonce)
    }

    /// gs2 header `n,,` (no channel binding, no authzid) plus the bare message.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    /// Consume server-first (`r=...,s=...,i=...`) and produce client-final.
    pub fn process_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| protocol_error(format!("Invalid UTF-8 in SASL continue: {e}")))?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|e| protocol_error(format!("Invalid base64 salt: {e}")))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|e| protocol_error(format!("Invalid iterations: {e}")))?,
                );
            }
        }

        let combined_nonce = combined_nonce.ok_or_else(|| protocol_error("Missing nonce"))?;
        let salt = salt.ok_or_else(|| protocol_error("Missing salt"))?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or_else(|| protocol_error("Missing iterations"))?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("SCRAM server nonce does not extend the client nonce"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|e| protocol_error(format!("PBKDF2 failed: {e}")))?;

        // biws = base64("n,,")
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            msg,
            client_final_without_proof
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!("{client_final_without_proof},p={}", BASE64.encode(&client_proof)).into_bytes())
    }

    /// Check the server signature in server-final (`v=...`).
    pub fn verify_server_final(&self, data: &[u8]) -> Result<()> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| protocol_error(format!("Invalid UTF-8 in SASL final: {e}")))?;
        if let Some(err) = msg.strip_prefix("e=") {
            return Err(auth_error(format!("SCRAM authentication failed: {err}")));
        }
        let signature_b64 = msg
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| protocol_error("Invalid server-final format"))?;
        let server_signature = BASE64
            .decode(signature_b64)
            .map_err(|e| protocol_error(format!("Invalid base64 server signature: {e}")))?;

        let salted_password = self
            .salted_password
            .as_ref()
            .ok_or_else(|| protocol_error("server-final before server-first"))?;
        let auth_message = self
            .auth_message
            .as_ref()
            .ok_or_else(|| protocol_error("server-final before server-first"))?;

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;
        if bool::from(server_signature.as_slice().ct_eq(&expected[..])) {
            Ok(())
        } else {
            Err(auth_error("SCRAM server signature mismatch"))
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| protocol_error(format!("HMAC init failed: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
