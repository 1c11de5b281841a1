//! MySQL transport: handshake, text-protocol queries, ping and close.
//!
//! The handshake runs in this order:
//! 1. TCP connect with the policy's connect timeout
//! 2. Read and decode the HandshakeV10 greeting
//! 3. Ask the advisor for the client capability word
//! 4. Upgrade to TLS when the word carries `CLIENT_SSL`
//! 5. Walk the pack's auth registry until one strategy gets an answer
//!
//! Any failure drops the socket before the error is returned.

use std::sync::Arc;
use std::time::Instant;

use adaptsql_core::error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, auth_error, protocol_error, tls_error,
};
use adaptsql_core::observe::noop;
use adaptsql_core::params::{LiteralStyle, PlaceholderStyle};
use adaptsql_core::{
    ColumnInfo, ConnectUrl, Dialect, ExecRequest, ExecResult, NetStream, Observer, Policy, Result,
    Row, Session, SessionMeta, TlsInfo, Transport, Value, WirePack, interpolate_params,
    validate_tls,
};

use crate::advisor::{propose_client_caps, wants_tls};
use crate::auth::{
    AuthAlgo, AuthRegistry, build_handshake_response, caching_sha2, cleartext_response,
};
use crate::codec::PacketCodec;
use crate::handshake::{Greeting, SALT_LEN};
use crate::protocol::{Command, ErrPacket, PacketReader, PacketType, capabilities};
use crate::tls;

/// Auth exchanges allowed after the handshake response before giving up.
const MAX_AUTH_ROUNDS: usize = 4;

/// A live MySQL connection.
pub struct MySqlTransport {
    codec: PacketCodec,
    pack: Arc<WirePack>,
    session: Session,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for MySqlTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlTransport")
            .field("session", &self.session.id)
            .field("url", &self.session.url)
            .field("tls", &self.session.tls)
            .field("closed", &self.codec.is_closed())
            .finish_non_exhaustive()
    }
}

/// What a successful login leaves behind.
struct Login {
    codec: PacketCodec,
    greeting: Greeting,
    client_caps: u32,
    plugin: String,
    methods: Vec<String>,
    tls: Option<TlsInfo>,
}

impl MySqlTransport {
    /// Connect and authenticate with the default no-op observer.
    pub fn connect(pack: Arc<WirePack>, url: &ConnectUrl, policy: &Policy) -> Result<Self> {
        Self::handshake(pack, url, policy, noop())
    }

    /// Connect, negotiate capabilities and authenticate.
    pub fn handshake(
        pack: Arc<WirePack>,
        url: &ConnectUrl,
        policy: &Policy,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let started = Instant::now();
        let result = establish(&pack, url, policy);
        let elapsed = started.elapsed();

        match result {
            Ok(login) => {
                let meta = SessionMeta {
                    host: url.host.clone(),
                    port: url.port_or(Dialect::Mysql.default_port()),
                    database: url.database.clone(),
                    user: url.user.clone(),
                    server_version: login.greeting.version_text.clone(),
                    connection_id: Some(login.greeting.connection_id),
                    server_caps: login.greeting.server_caps,
                    client_caps: login.client_caps,
                    auth_plugin: Some(login.plugin),
                    auth_methods: login.methods,
                    tls: login.tls,
                };
                let session = Session::new(url.redacted(), pack.name.clone(), meta);
                tracing::info!(
                    session = %session.id,
                    url = %session.url,
                    version = %session.meta.server_version,
                    tls = session.tls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "MySQL session established"
                );
                observer.on_connect(&pack.name, session.tls, elapsed, true);
                Ok(Self {
                    codec: login.codec,
                    pack,
                    session,
                    observer,
                })
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "MySQL handshake failed");
                observer.on_connect(&pack.name, false, elapsed, false);
                Err(e)
            }
        }
    }

    pub fn pack(&self) -> &WirePack {
        &self.pack
    }

    fn ensure_open(&self) -> Result<()> {
        if self.codec.is_closed() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "session is closed".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    /// Send one command packet, starting a fresh sequence.
    fn send_command(&mut self, opcode: u8, body: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(opcode);
        payload.extend_from_slice(body);
        self.codec.reset_sequence();
        self.codec.write_packet(&payload)
    }

    fn run_query(&mut self, sql: &str) -> Result<ExecResult> {
        self.send_command(self.pack.commands.query, sql.as_bytes())?;
        let first = self.codec.read_packet()?;
        let Some(&marker) = first.first() else {
            return Err(protocol_error("empty query response"));
        };

        match PacketType::from_first_byte(marker, first.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&first)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                Ok(ExecResult::ok(
                    ok.affected_rows,
                    (ok.last_insert_id != 0).then_some(ok.last_insert_id),
                ))
            }
            PacketType::Error => Err(query_error(&parse_err(&first)?, sql)),
            PacketType::LocalInfile => Err(Error::Query(QueryError {
                code: 0,
                sql: Some(sql.to_string()),
                sqlstate: None,
                message: "LOCAL INFILE is not supported".to_string(),
                detail: None,
                hint: None,
            })),
            PacketType::Eof | PacketType::Data => self.read_result_set(&first, sql),
        }
    }

    fn read_result_set(&mut self, first: &[u8], sql: &str) -> Result<ExecResult> {
        let column_count = PacketReader::new(first)
            .read_lenenc_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| protocol_error("malformed column count"))?;

        let mut names = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let def = self.codec.read_packet()?;
            names.push(column_name(&def)?);
        }
        let columns = Arc::new(ColumnInfo::new(names));

        // CLIENT_DEPRECATE_EOF is never requested, so an EOF separates metadata from rows.
        let terminator = self.codec.read_packet()?;
        if terminator.first() != Some(&0xFE) {
            return Err(protocol_error(
                "expected EOF after column definitions",
            ));
        }

        let mut rows = Vec::new();
        loop {
            let packet = self.codec.read_packet()?;
            let Some(&marker) = packet.first() else {
                return Err(protocol_error("empty row packet"));
            };
            match PacketType::from_first_byte(marker, packet.len()) {
                PacketType::Eof => break,
                PacketType::Error => return Err(query_error(&parse_err(&packet)?, sql)),
                _ => {
                    let values = decode_text_row(&packet, column_count)?;
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
            }
        }

        let affected_rows = rows.len() as u64;
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
                self.codec.shutdown();
            }
        }
        result
    }
}

impl Transport for MySqlTransport {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn exec(&mut self, req: &ExecRequest) -> Result<ExecResult> {
        self.ensure_open()?;
        let sql = interpolate_params(
            &req.sql,
            &req.params,
            PlaceholderStyle::QuestionMark,
            LiteralStyle::Backslash,
        );
        let started = Instant::now();
        let result = self.run_query(&sql);
        let result = self.settle(result);
        let elapsed = started.elapsed();

        match &result {
            Ok(r) => tracing::debug!(
                session = %self.session.id,
                rows = r.rows.len(),
                affected = r.affected_rows,
                elapsed_ms = elapsed.as_millis() as u64,
                "query ok"
            ),
            Err(e) => tracing::debug!(session = %self.session.id, error = %e, "query failed"),
        }
        self.observer.on_query(&sql, elapsed, result.is_ok());
        result
    }

    fn ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        let opcode = self.pack.commands.ping.unwrap_or(Command::Ping as u8);
        let result = self.send_command(opcode, &[]).and_then(|()| {
            let reply = self.codec.read_packet()?;
            match reply.first() {
                Some(0x00) => Ok(()),
                Some(0xFF) => Err(query_error(&parse_err(&reply)?, "PING")),
                _ => Err(protocol_error("unexpected reply to ping")),
            }
        });
        self.settle(result)
    }

    fn close(&mut self) -> Result<()> {
        if self.codec.is_closed() {
            return Ok(());
        }
        let opcode = self.pack.commands.quit.unwrap_or(Command::Quit as u8);
        if let Err(e) = self.send_command(opcode, &[]) {
            tracing::debug!(session = %self.session.id, error = %e, "quit not delivered");
        }
        self.codec.shutdown();
        tracing::debug!(session = %self.session.id, "MySQL session closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.codec.is_closed()
    }
}

fn establish(pack: &WirePack, url: &ConnectUrl, policy: &Policy) -> Result<Login> {
    let port = url.port_or(Dialect::Mysql.default_port());
    let stream = NetStream::connect(
        &url.host,
        port,
        policy.connect_timeout(url),
        policy.read_timeout(),
    )?;
    let mut codec = PacketCodec::new(stream);

    let greeting = Greeting::parse(&codec.read_packet()?, url.is_localhost(), url.tls_requested())?;
    tracing::debug!(
        version = %greeting.version_text,
        plugin = %greeting.auth_plugin,
        caps = format_args!("{:#010x}", greeting.server_caps),
        "greeting received"
    );

    let database = url.database.as_deref().filter(|d| !d.is_empty());
    let mut client_caps = propose_client_caps(&greeting, policy, database.is_some());

    let mut tls_info = None;
    if wants_tls(client_caps) {
        // Sequence ids continue across the upgrade: SSLRequest is 1, the response 2.
        tls_info = Some(tls::negotiate(&mut codec, pack, &greeting, client_caps, url)?);
    }
    enforce_tls_policy(tls_info.as_ref(), policy, url)?;

    let password = url.password.as_deref().unwrap_or("");
    let registry = AuthRegistry::from_pack(pack);
    let mut methods = Vec::new();
    let mut last_error = None;

    for candidate in registry.candidates() {
        let name = candidate.algo.plugin_name();
        if candidate.requires_tls && !codec.stream().is_tls() {
            if !greeting.server_supports(capabilities::CLIENT_SSL) {
                tracing::debug!(plugin = name, "skipping: needs TLS the server does not offer");
                last_error = Some(auth_error(format!(
                    "{name} requires TLS, which the server does not offer"
                )));
                continue;
            }
            client_caps |= capabilities::CLIENT_SSL;
            // Same sequence as above; the counter is not reset by the upgrade.
            let info = tls::negotiate(&mut codec, pack, &greeting, client_caps, url)?;
            enforce_tls_policy(Some(&info), policy, url)?;
            tls_info = Some(info);
        }

        let encrypted = codec.stream().is_tls();
        let response = match candidate.algo.initial_response(password, &greeting.salt, encrypted) {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        methods.push(name.to_string());
        let payload = build_handshake_response(
            client_caps,
            pack.charset(),
            &url.user,
            &response,
            database,
            name,
        )?;
        codec.write_packet(&payload)?;

        // The server closes the connection after rejecting credentials, so
        // a server verdict ends the walk either way.
        let plugin = finish_auth(&mut codec, name, password, encrypted, &mut methods)?;
        return Ok(Login {
            codec,
            greeting,
            client_caps,
            plugin,
            methods,
            tls: tls_info,
        });
    }

    codec.shutdown();
    Err(match last_error {
        Some(e) if e.is_auth_error() => e,
        Some(e) => auth_error(e.to_string()),
        None => auth_error(format!(
            "wire pack {:?} declares no supported auth plugin",
            pack.name
        )),
    })
}

/// Reject a channel the policy does not accept.
fn enforce_tls_policy(tls: Option<&TlsInfo>, policy: &Policy, url: &ConnectUrl) -> Result<()> {
    let violations = validate_tls(tls, policy, url.is_localhost());
    if violations.is_empty() {
        Ok(())
    } else {
        Err(tls_error(violations.join("; ")))
    }
}

/// Drive the server's answers to the handshake response until OK or ERR.
///
/// Returns the plugin that finally authenticated the session.
fn finish_auth(
    codec: &mut PacketCodec,
    initial_plugin: &str,
    password: &str,
    encrypted: bool,
    methods: &mut Vec<String>,
) -> Result<String> {
    let mut plugin = initial_plugin.to_string();

    for _ in 0..MAX_AUTH_ROUNDS {
        let packet = codec.read_packet()?;
        match packet.first() {
            Some(0x00) => return Ok(plugin),
            Some(0xFF) => {
                let err = parse_err(&packet)?;
                return Err(auth_error(format!(
                    "Auth error {}: {}",
                    err.error_code, err.error_message
                )));
            }
            Some(0x01) if packet.get(1) == Some(&caching_sha2::FAST_AUTH_SUCCESS) => {}
            Some(0x01 | 0xFE) if encrypted => {
                if packet[0] == 0xFE {
                    let mut reader = PacketReader::new(&packet[1..]);
                    if let Some(name) = reader.read_null_string().filter(|n| !n.is_empty()) {
                        plugin = name;
                        methods.push(plugin.clone());
                    }
                }
                codec.write_packet(&cleartext_response(password))?;
                return expect_ok(codec, plugin);
            }
            Some(0x01) if packet.get(1) == Some(&caching_sha2::PERFORM_FULL_AUTH) => {
                return Err(auth_error(
                    "caching_sha2_password full authentication requires TLS",
                ));
            }
            Some(0xFE) => {
                let mut reader = PacketReader::new(&packet[1..]);
                let name = reader.read_null_string().unwrap_or_default();
                let mut salt = reader.read_rest().to_vec();
                if salt.last() == Some(&0) {
                    salt.pop();
                }
                salt.truncate(SALT_LEN);
                let algo = AuthAlgo::from_plugin(&name).ok_or_else(|| {
                    auth_error(format!("server switched to unsupported auth plugin {name:?}"))
                })?;
                tracing::debug!(from = %plugin, to = %name, "auth switch");
                plugin = name;
                methods.push(plugin.clone());
                codec.write_packet(&algo.switch_response(password, &salt))?;
            }
            Some(other) => {
                return Err(protocol_error(format!(
                    "unexpected auth response 0x{other:02x}"
                )));
            }
            None => return Err(protocol_error("empty auth response")),
        }
    }

    Err(protocol_error("authentication did not complete"))
}

/// After resending the password the next packet must be OK.
fn expect_ok(codec: &mut PacketCodec, plugin: String) -> Result<String> {
    let packet = codec.read_packet()?;
    match packet.first() {
        Some(0x00) => Ok(plugin),
        Some(0xFF) => {
            let err = parse_err(&packet)?;
            Err(auth_error(format!(
                "Auth error {}: {}",
                err.error_code, err.error_message
            )))
        }
        _ => Err(auth_error("Auth failed after password resend")),
    }
}

fn parse_err(payload: &[u8]) -> Result<ErrPacket> {
    PacketReader::new(payload)
        .parse_err_packet()
        .ok_or_else(|| protocol_error("malformed ERR packet"))
}

fn query_error(err: &ErrPacket, sql: &str) -> Error {
    Error::Query(QueryError {
        code: err.error_code,
        sql: Some(sql.to_string()),
        sqlstate: (!err.sql_state.is_empty()).then(|| err.sql_state.clone()),
        message: err.error_message.clone(),
        detail: None,
        hint: None,
    })
}

/// The `name` field of a ColumnDefinition41 packet.
///
/// Layout: catalog, schema, table, org_table, name, ... (all lenenc strings).
fn column_name(def: &[u8]) -> Result<String> {
    let mut reader = PacketReader::new(def);
    for field in ["catalog", "schema", "table", "org_table"] {
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error(format!("column definition truncated in {field}")))?;
    }
    reader
        .read_lenenc_string()
        .ok_or_else(|| protocol_error("column definition truncated in name"))
}

/// Decode one text-protocol row into `columns` values.
pub fn decode_text_row(payload: &[u8], columns: usize) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns);
    for _ in 0..columns {
        let value = match reader.read_text_value()? {
            None => Value::Null,
            Some(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        };
        values.push(value);
    }
    Ok(values)
}
