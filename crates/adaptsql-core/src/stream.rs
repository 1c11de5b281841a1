//! Socket layer shared by the wire transports.
//!
//! [`NetStream`] is a plain TCP socket that can be upgraded in place to a
//! rustls session once the protocol-level TLS request has been acknowledged.
//! Timeouts live on the socket; any timeout is followed by a shutdown so no
//! half-open connection is left behind.

use crate::config::{Policy, SslMode};
use crate::error::{ConnectionError, ConnectionErrorKind, Error, Result};
use crate::transport::TlsInfo;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(feature = "tls")]
use crate::error::tls_error;

/// A socket that is plaintext, TLS-wrapped, or already released.
pub enum NetStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
    Closed,
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetStream::Plain(_) => f.write_str("NetStream::Plain"),
            #[cfg(feature = "tls")]
            NetStream::Tls(_) => f.write_str("NetStream::Tls"),
            NetStream::Closed => f.write_str("NetStream::Closed"),
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            NetStream::Tls(s) => s.read(buf),
            NetStream::Closed => Err(closed_error()),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            NetStream::Tls(s) => s.write(buf),
            NetStream::Closed => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            NetStream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            NetStream::Tls(s) => s.flush(),
            NetStream::Closed => Err(closed_error()),
        }
    }
}

impl NetStream {
    /// Open a TCP connection with a connect timeout and per-read deadline.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("Failed to resolve {host}:{port}: {e}"),
                    source: Some(Box::new(e)),
                })
            })?
            .collect();

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    stream.set_read_timeout(Some(read_timeout)).ok();
                    stream.set_write_timeout(Some(read_timeout)).ok();
                    tracing::debug!(%addr, "TCP connection established");
                    return Ok(NetStream::Plain(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Error::Timeout
            }
            Some(e) => {
                let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                Error::Connection(ConnectionError {
                    kind,
                    message: format!("Failed to connect to {host}:{port}: {e}"),
                    source: Some(Box::new(e)),
                })
            }
            None => Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("{host}:{port} resolved to no addresses"),
                source: None,
            }),
        })
    }

    pub fn is_tls(&self) -> bool {
        match self {
            #[cfg(feature = "tls")]
            NetStream::Tls(_) => true,
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NetStream::Closed)
    }

    /// Read exactly `buf.len()` bytes, accumulating partial deliveries.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }

    /// Release the socket. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        match std::mem::replace(self, NetStream::Closed) {
            NetStream::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            #[cfg(feature = "tls")]
            NetStream::Tls(mut s) => {
                s.conn.send_close_notify();
                let _ = s.conn.complete_io(&mut s.sock);
                let _ = s.sock.shutdown(Shutdown::Both);
            }
            NetStream::Closed => {}
        }
    }

    /// Wrap the plain socket in a TLS session and complete the handshake.
    #[cfg(feature = "tls")]
    pub fn upgrade_tls(&mut self, host: &str, ssl_mode: SslMode) -> Result<TlsInfo> {
        let plain = match std::mem::replace(self, NetStream::Closed) {
            NetStream::Plain(s) => s,
            other => {
                *self = other;
                return Err(tls_error("TLS upgrade requires a plain TCP stream"));
            }
        };

        let config = build_client_config(ssl_mode)?;
        let name = server_name(host)?;
        let conn = rustls::ClientConnection::new(std::sync::Arc::new(config), name)
            .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))?;

        let mut tls_stream = rustls::StreamOwned::new(conn, plain);
        while tls_stream.conn.is_handshaking() {
            if let Err(e) = tls_stream.conn.complete_io(&mut tls_stream.sock) {
                let _ = tls_stream.sock.shutdown(Shutdown::Both);
                let timed_out = matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                );
                return Err(if timed_out {
                    Error::Timeout
                } else {
                    tls_error(format!("TLS handshake failed: {e}"))
                });
            }
        }

        let info = TlsInfo {
            secure: true,
            protocol: tls_stream
                .conn
                .protocol_version()
                .map(|v| format!("{v:?}")),
            cipher: tls_stream
                .conn
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            fingerprint: tls_stream
                .conn
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|leaf| certificate_fingerprint(leaf.as_ref())),
            verified: ssl_mode.verifies_certificate(),
        };
        tracing::debug!(
            host,
            protocol = ?info.protocol,
            cipher = ?info.cipher,
            verified = info.verified,
            "TLS established"
        );

        *self = NetStream::Tls(Box::new(tls_stream));
        Ok(info)
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_tls(&mut self, _host: &str, _ssl_mode: SslMode) -> Result<TlsInfo> {
        Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Ssl,
            message: "TLS requested but adaptsql-core was built without feature 'tls'".to_string(),
            source: None,
        }))
    }
}

/// SHA-256 of a DER certificate, lower-case hex.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(der))
}

#[cfg(feature = "tls")]
fn server_name(host: &str) -> Result<rustls::pki_types::ServerName<'static>> {
    host.to_string()
        .try_into()
        .map_err(|e| tls_error(format!("Invalid server name '{host}': {e}")))
}

/// Build a rustls config for the SSL mode.
///
/// `verify-ca`/`verify-full` verify against the webpki root bundle; every
/// other mode encrypts without verifying, leaving trust to [`validate_tls`].
#[cfg(feature = "tls")]
fn build_client_config(ssl_mode: SslMode) -> Result<rustls::ClientConfig> {
    use std::sync::Arc;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?;

    if ssl_mode.verifies_certificate() {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Ok(builder.with_root_certificates(roots).with_no_client_auth())
    } else {
        Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(no_verify::NoVerifier))
            .with_no_client_auth())
    }
}

#[cfg(feature = "tls")]
mod no_verify {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    pub(super) struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

/// Check the negotiated channel against the policy.
///
/// Returns every violation found; an empty list means the channel is acceptable.
pub fn validate_tls(tls: Option<&TlsInfo>, policy: &Policy, is_localhost: bool) -> Vec<String> {
    let mut violations = Vec::new();
    let secure = tls.is_some_and(|t| t.secure);

    if policy.forces_tls(is_localhost) && !secure {
        violations.push("TLS required for remote connections".to_string());
    }

    let Some(info) = tls.filter(|t| t.secure) else {
        return violations;
    };

    if let Some(protocol) = &info.protocol {
        if matches!(protocol.as_str(), "SSLv3" | "TLSv1_0" | "TLSv1_1") {
            violations.push(format!("TLS version {protocol} below minimum TLSv1_2"));
        }
    }

    if let Some(pin) = &policy.pinned_fingerprint {
        match &info.fingerprint {
            Some(fp) if fp == pin => {}
            Some(_) => violations
                .push("Certificate fingerprint does not match the pinned value".to_string()),
            None => violations
                .push("Server presented no certificate to compare with the pin".to_string()),
        }
    }

    if policy.verify_hostname && !info.verified {
        violations.push("Hostname verification failed".to_string());
    }

    violations
}
