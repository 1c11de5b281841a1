//! The transport contract shared by every dialect.
//!
//! - [`Transport`] - one live connection speaking one wire protocol
//! - [`Session`] - identity and handshake metadata of that connection
//! - [`ExecRequest`] / [`ExecResult`] - a text-protocol round trip
//!
//! A `Transport` is half-duplex: one request in flight at a time, enforced by
//! `&mut self` on every call. Callers only ever hold `Box<dyn Transport>`.

use crate::error::Result;
use crate::params::{LiteralStyle, PlaceholderStyle};
use crate::row::{ColumnInfo, Row};
use crate::value::Value;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQL dialect family a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Postgres,
}

impl Dialect {
    /// Family name as used by the registry.
    pub const fn family(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    pub fn from_family(family: &str) -> Option<Self> {
        match family {
            "mysql" => Some(Dialect::Mysql),
            "postgres" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Dialect::Mysql => 3306,
            Dialect::Postgres => 5432,
        }
    }

    pub const fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Dialect::Mysql => PlaceholderStyle::QuestionMark,
            Dialect::Postgres => PlaceholderStyle::Dollar,
        }
    }

    pub const fn literal_style(self) -> LiteralStyle {
        match self {
            Dialect::Mysql => LiteralStyle::Backslash,
            Dialect::Postgres => LiteralStyle::Standard,
        }
    }
}

/// What was observed about the TLS channel after the upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub secure: bool,
    /// e.g. `"TLSv1_3"`
    pub protocol: Option<String>,
    pub cipher: Option<String>,
    /// SHA-256 of the peer leaf certificate, lower-case hex
    pub fingerprint: Option<String>,
    /// The certificate chain and hostname were verified during the handshake
    pub verified: bool,
}

/// Handshake metadata recorded on the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: String,
    pub server_version: String,
    pub connection_id: Option<u32>,
    /// Capability word advertised by the server (0 where the protocol has none)
    pub server_caps: u32,
    /// Capability word the client sent
    pub client_caps: u32,
    /// Auth plugin/method that succeeded
    pub auth_plugin: Option<String>,
    /// Auth methods observed during the handshake, in order
    pub auth_methods: Vec<String>,
    pub tls: Option<TlsInfo>,
}

/// One connection's identity. Owned by the transport that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Connection URL with the password redacted
    pub url: String,
    pub pack_name: String,
    /// Milliseconds since the Unix epoch
    pub connected_at: u64,
    pub tls: bool,
    pub meta: SessionMeta,
}

impl Session {
    pub fn new(url: String, pack_name: impl Into<String>, meta: SessionMeta) -> Self {
        let tls = meta.tls.as_ref().is_some_and(|t| t.secure);
        Self {
            id: new_session_id(),
            url,
            pack_name: pack_name.into(),
            connected_at: unix_millis(),
            tls,
            meta,
        }
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A statement plus positional parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecRequest {
    pub sql: String,
    pub params: Vec<Value>,
}

impl ExecRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append one positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Result of one text-protocol round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    #[serde(serialize_with = "serialize_columns")]
    pub columns: Arc<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Rows affected (OK packet / command tag); row count for result sets
    pub affected_rows: u64,
    pub last_insert_id: Option<u64>,
}

fn serialize_columns<S: serde::Serializer>(
    columns: &Arc<ColumnInfo>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(columns.names())
}

impl ExecResult {
    /// An OK result without rows.
    pub fn ok(affected_rows: u64, last_insert_id: Option<u64>) -> Self {
        Self {
            columns: Arc::new(ColumnInfo::default()),
            rows: Vec::new(),
            affected_rows,
            last_insert_id,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column of the first row, as text.
    pub fn scalar_text(&self) -> Option<&str> {
        self.rows.first().and_then(|r| r.get(0)).and_then(Value::as_str)
    }
}

/// One live connection speaking one wire protocol.
///
/// Implementations must release the socket in [`Transport::close`] even when
/// an earlier call failed, and must never pipeline requests.
pub trait Transport: Send {
    fn dialect(&self) -> Dialect;

    fn session(&self) -> &Session;

    /// Run one statement, interpolating `?`/`$n` placeholders client-side.
    fn exec(&mut self, req: &ExecRequest) -> Result<ExecResult>;

    fn ping(&mut self) -> Result<()>;

    /// `EXPLAIN <sql>`, returned as rows.
    fn explain(&mut self, sql: &str) -> Result<ExecResult> {
        self.exec(&ExecRequest::new(format!("EXPLAIN {sql}")))
    }

    /// Send the protocol goodbye (best effort) and drop the socket.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Run a statement without parameters.
    fn query(&mut self, sql: &str) -> Result<ExecResult> {
        self.exec(&ExecRequest::new(sql))
    }
}
