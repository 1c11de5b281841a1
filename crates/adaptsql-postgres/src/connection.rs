//! PostgreSQL v3 session over a [`NetStream`].
//!
//! Connection setup runs: TCP connect, optional SSLRequest upgrade, startup
//! message, authentication, then server parameters until ReadyForQuery.
//! Queries use the simple-query protocol; every exchange is drained up to
//! the next ReadyForQuery so a failed statement leaves the session usable.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use adaptsql_core::error::{
    ConnectionError, ConnectionErrorKind, QueryError, auth_error, protocol_error, tls_error,
};
use adaptsql_core::observe::noop;
use adaptsql_core::params::{LiteralStyle, PlaceholderStyle};
use adaptsql_core::{
    ColumnInfo, ConnectUrl, Dialect, Error, ExecRequest, ExecResult, NetStream, Observer, Policy,
    Result, Row, Session, SessionMeta, TlsInfo, Transport, Value, WirePack, interpolate_params,
    validate_tls,
};

use crate::auth::{AuthMethod, AuthPolicy, ScramClient, md5_password, scram};
use crate::protocol::{
    BackendMessage, ErrorFields, FrontendMessage, MessageReader, MessageWriter, PROTOCOL_VERSION,
    TransactionStatus, affected_rows_from_tag,
};

/// Live PostgreSQL session.
pub struct PgTransport {
    stream: NetStream,
    reader: MessageReader,
    writer: MessageWriter,
    read_buf: Vec<u8>,
    pack: Arc<WirePack>,
    session: Session,
    observer: Arc<dyn Observer>,
    parameters: HashMap<String, String>,
    process_id: i32,
    secret_key: i32,
    tx_status: TransactionStatus,
}

impl std::fmt::Debug for PgTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransport")
            .field("session", &self.session.id)
            .field("url", &self.session.url)
            .field("process_id", &self.process_id)
            .field("tx_status", &self.tx_status)
            .finish_non_exhaustive()
    }
}

impl PgTransport {
    /// Connect and authenticate with the default no-op observer.
    pub fn connect(pack: Arc<WirePack>, url: &ConnectUrl, policy: &Policy) -> Result<Self> {
        Self::handshake(pack, url, policy, noop())
    }

    /// Connect, negotiate TLS, authenticate and wait for ReadyForQuery.
    #[tracing::instrument(level = "debug", skip_all, fields(url = %url))]
    pub fn handshake(
        pack: Arc<WirePack>,
        url: &ConnectUrl,
        policy: &Policy,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let started = Instant::now();
        let port = url.port_or(Dialect::Postgres.default_port());
        let stream = match NetStream::connect(
            &url.host,
            port,
            policy.connect_timeout(url),
            policy.read_timeout(),
        ) {
            Ok(s) => s,
            Err(e) => {
                observer.on_connect(&pack.name, false, started.elapsed(), false);
                return Err(e);
            }
        };

        let meta = SessionMeta {
            host: url.host.clone(),
            port,
            database: url.database.clone(),
            user: url.user.clone(),
            ..SessionMeta::default()
        };
        let mut conn = Self {
            stream,
            reader: MessageReader::new(),
            writer: MessageWriter::new(),
            read_buf: vec![0u8; 8192],
            session: Session::new(url.redacted(), pack.name.clone(), meta),
            pack,
            observer,
            parameters: HashMap::new(),
            process_id: 0,
            secret_key: 0,
            tx_status: TransactionStatus::Idle,
        };

        let result = conn.establish(url, policy);
        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                tracing::info!(
                    session = %conn.session.id,
                    url = %conn.session.url,
                    version = %conn.session.meta.server_version,
                    tls = conn.session.tls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "PostgreSQL session established"
                );
                conn.observer
                    .on_connect(&conn.pack.name, conn.session.tls, elapsed, true);
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "PostgreSQL handshake failed");
                conn.observer.on_connect(&conn.pack.name, false, elapsed, false);
                conn.stream.shutdown();
                Err(e)
            }
        }
    }

    pub fn pack(&self) -> &WirePack {
        &self.pack
    }

    /// A server parameter reported during startup (`server_version`, `TimeZone`, ...).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Backend process id and secret key, for an out-of-band cancel.
    pub fn backend_key(&self) -> (i32, i32) {
        (self.process_id, self.secret_key)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    fn establish(&mut self, url: &ConnectUrl, policy: &Policy) -> Result<()> {
        let want_tls = url.tls_requested() || policy.forces_tls(url.is_localhost());
        let tls = if want_tls {
            Some(self.negotiate_ssl(url)?)
        } else {
            None
        };
        let violations = validate_tls(tls.as_ref(), policy, url.is_localhost());
        if !violations.is_empty() {
            return Err(tls_error(violations.join("; ")));
        }
        self.session.tls = tls.as_ref().is_some_and(|t| t.secure);
        self.session.meta.tls = tls;

        let mut params = vec![("user".to_string(), url.user.clone())];
        if let Some(db) = url.database.as_deref().filter(|d| !d.is_empty()) {
            params.push(("database".to_string(), db.to_string()));
        }
        params.push(("client_encoding".to_string(), "UTF8".to_string()));
        params.push(("application_name".to_string(), "adaptsql".to_string()));
        self.send_message(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params,
        })?;

        let password = url.password.as_deref().unwrap_or("");
        self.authenticate(&url.user, password)?;
        self.read_startup_messages()?;

        self.session.meta.server_version = self
            .parameters
            .get("server_version")
            .cloned()
            .unwrap_or_default();
        self.session.meta.connection_id = u32::try_from(self.process_id).ok();
        Ok(())
    }

    /// Ask for TLS with an SSLRequest and upgrade on `S`.
    fn negotiate_ssl(&mut self, url: &ConnectUrl) -> Result<TlsInfo> {
        self.send_message(&FrontendMessage::SSLRequest)?;
        let mut answer = [0u8; 1];
        self.stream
            .read_exact(&mut answer)
            .map_err(|e| adaptsql_core::error::io_to_error(e, "reading SSLRequest answer"))?;
        match answer[0] {
            b'S' => self.stream.upgrade_tls(&url.host, url.ssl_mode),
            b'N' => Err(tls_error(format!(
                "TLS required but {}:{} refused the SSLRequest",
                url.host,
                url.port_or(Dialect::Postgres.default_port())
            ))),
            other => Err(protocol_error(format!(
                "unexpected SSLRequest answer 0x{other:02x}"
            ))),
        }
    }

    fn authenticate(&mut self, user: &str, password: &str) -> Result<()> {
        let policy = AuthPolicy::from_pack(&self.pack);
        loop {
            let method = match self.receive_message()? {
                BackendMessage::AuthenticationOk => return Ok(()),
                BackendMessage::AuthenticationCleartextPassword => AuthMethod::Cleartext,
                BackendMessage::AuthenticationMD5Password(salt) => {
                    self.admit(&policy, AuthMethod::Md5)?;
                    let hash = md5_password(user, password, salt);
                    self.send_message(&FrontendMessage::PasswordMessage(hash))?;
                    continue;
                }
                BackendMessage::AuthenticationSASL(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                        return Err(auth_error(format!(
                            "Unsupported SASL mechanisms: {mechanisms:?}"
                        )));
                    }
                    self.admit(&policy, AuthMethod::ScramSha256)?;
                    self.scram_auth(password)?;
                    continue;
                }
                BackendMessage::AuthenticationOther(code) => {
                    return Err(auth_error(format!(
                        "server requested unsupported authentication method {code}"
                    )));
                }
                BackendMessage::ErrorResponse(e) => return Err(error_from_fields(&e, None)),
                other => {
                    return Err(protocol_error(format!(
                        "Unexpected message during auth: {other:?}"
                    )));
                }
            };

            self.admit(&policy, method)?;
            self.send_message(&FrontendMessage::PasswordMessage(password.to_string()))?;
        }
    }

    /// Check a server-chosen method against the pack and the channel.
    fn admit(&mut self, policy: &AuthPolicy, method: AuthMethod) -> Result<()> {
        let name = method.pack_name();
        match policy.requires_tls(method) {
            None => Err(auth_error(format!(
                "server requested {name}, which wire pack {:?} does not allow",
                self.pack.name
            ))),
            Some(true) if !self.stream.is_tls() => Err(auth_error(format!(
                "{name} authentication requires TLS"
            ))),
            Some(_) => {
                tracing::debug!(method = name, "authenticating");
                self.session.meta.auth_methods.push(name.to_string());
                self.session.meta.auth_plugin = Some(name.to_string());
                Ok(())
            }
        }
    }

    fn scram_auth(&mut self, password: &str) -> Result<()> {
        let mut client = ScramClient::new(password);
        self.send_message(&FrontendMessage::SASLInitialResponse {
            mechanism: scram::MECHANISM.to_string(),
            data: client.client_first(),
        })?;

        let server_first = match self.receive_message()? {
            BackendMessage::AuthenticationSASLContinue(data) => data,
            BackendMessage::ErrorResponse(e) => return Err(error_from_fields(&e, None)),
            other => {
                return Err(protocol_error(format!(
                    "Expected SASL continue, got: {other:?}"
                )));
            }
        };
        let client_final = client.process_server_first(&server_first)?;
        self.send_message(&FrontendMessage::SASLResponse(client_final))?;

        match self.receive_message()? {
            BackendMessage::AuthenticationSASLFinal(data) => client.verify_server_final(&data),
            BackendMessage::ErrorResponse(e) => Err(error_from_fields(&e, None)),
            other => Err(protocol_error(format!(
                "Expected SASL final, got: {other:?}"
            ))),
        }
    }

    fn read_startup_messages(&mut self) -> Result<()> {
        loop {
            match self.receive_message()? {
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.tx_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse(e) => return Err(error_from_fields(&e, None)),
                BackendMessage::NoticeResponse(n) => {
                    tracing::debug!(code = %n.code, message = %n.message, "startup notice");
                }
                other => {
                    return Err(protocol_error(format!(
                        "Unexpected startup message: {other:?}"
                    )));
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.stream.is_closed() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "session is closed".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    /// Run one simple query and drain the exchange up to ReadyForQuery.
    ///
    /// With several statements the last result set wins; the first error
    /// is reported once the server is ready again.
    fn run_query(&mut self, sql: &str) -> Result<ExecResult> {
        self.send_message(&FrontendMessage::Query(sql.to_string()))?;

        let mut columns = Arc::new(ColumnInfo::new(Vec::new()));
        let mut rows = Vec::new();
        let mut affected_rows = 0;
        let mut failure = None;

        loop {
            match self.receive_message()? {
                BackendMessage::RowDescription(names) => {
                    columns = Arc::new(ColumnInfo::new(names));
                    rows.clear();
                }
                BackendMessage::DataRow(values) => {
                    if values.len() != columns.len() {
                        return Err(protocol_error(format!(
                            "DataRow has {} values for {} columns",
                            values.len(),
                            columns.len()
                        )));
                    }
                    let values = values
                        .into_iter()
                        .map(|v| match v {
                            None => Value::Null,
                            Some(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
                        })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                BackendMessage::CommandComplete(tag) => {
                    affected_rows = affected_rows_from_tag(&tag);
                }
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(fields) => {
                    if failure.is_none() {
                        failure = Some(error_from_fields(&fields, Some(sql)));
                    }
                }
                BackendMessage::NoticeResponse(n) => {
                    tracing::debug!(code = %n.code, message = %n.message, "notice");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.tx_status = status;
                    break;
                }
                other => {
                    return Err(protocol_error(format!(
                        "Unexpected message during query: {other:?}"
                    )));
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        Ok(ExecResult {
            columns,
            rows,
            affected_rows,
            last_insert_id: None,
        })
    }

    /// Drop the socket when an error leaves the protocol state unknown.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal_to_session() {
                tracing::warn!(session = %self.session.id, error = %e, "tearing down session");
                self.stream.shutdown();
            }
        }
        result
    }

    fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let data = self.writer.write(msg);
        let result = self
            .stream
            .write_all(data)
            .and_then(|()| self.stream.flush())
            .map_err(|e| adaptsql_core::error::io_to_error(e, "writing message"));
        if result.is_err() {
            self.stream.shutdown();
        }
        result
    }

    fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match self.reader.next_message() {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                Err(e) => {
                    self.stream.shutdown();
                    return Err(e);
                }
            }

            let n = match self.stream.read(&mut self.read_buf) {
                Ok(n) => n,
                Err(e) => {
                    self.stream.shutdown();
                    return Err(adaptsql_core::error::io_to_error(e, "reading from server"));
                }
            };
            if n == 0 {
                self.stream.shutdown();
                return Err(if self.reader.buffered() > 0 {
                    protocol_error("connection closed in the middle of a message")
                } else {
                    Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: "Connection closed by server".to_string(),
                        source: None,
                    })
                });
            }
            self.reader.feed(&self.read_buf[..n]);
        }
    }
}

impl Transport for PgTransport {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn exec(&mut self, req: &ExecRequest) -> Result<ExecResult> {
        self.ensure_open()?;
        let sql = interpolate_params(
            &req.sql,
            &req.params,
            PlaceholderStyle::Dollar,
            LiteralStyle::Standard,
        );
        tracing::debug!(session = %self.session.id, sql = %sql, "exec");
        let started = Instant::now();
        let result = self.run_query(&sql);
        let result = self.settle(result);
        let elapsed = started.elapsed();
        if let Err(e) = &result {
            tracing::debug!(session = %self.session.id, error = %e, "query failed");
        }
        self.observer.on_query(&sql, elapsed, result.is_ok());
        result
    }

    fn ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.run_query("SELECT 1").map(|_| ());
        self.settle(result)
    }

    fn close(&mut self) -> Result<()> {
        if self.stream.is_closed() {
            return Ok(());
        }
        if let Err(e) = self.send_message(&FrontendMessage::Terminate) {
            tracing::debug!(session = %self.session.id, error = %e, "terminate not delivered");
        }
        self.stream.shutdown();
        tracing::debug!(session = %self.session.id, "PostgreSQL session closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}

impl Drop for PgTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Map an ErrorResponse onto the error taxonomy by SQLSTATE class.
fn error_from_fields(fields: &ErrorFields, sql: Option<&str>) -> Error {
    let message = if fields.message.is_empty() {
        format!("{} {}", fields.severity, fields.code)
    } else {
        fields.message.clone()
    };
    match fields.code.get(..2) {
        Some("28") => auth_error(format!("Auth error {}: {}", fields.code, message)),
        Some("08") => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Connect,
            message,
            source: None,
        }),
        _ => Error::Query(QueryError {
            code: 0,
            sql: sql.map(str::to_string),
            sqlstate: (!fields.code.is_empty()).then(|| fields.code.clone()),
            message,
            detail: fields.detail.clone(),
            hint: fields.hint.clone(),
        }),
    }
}
