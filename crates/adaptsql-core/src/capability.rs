//! Learned capability records.
//!
//! [`CapabilityMatrix`] describes the server (version, feature flags, limits,
//! security posture). [`FeatureMap`] describes the SQL-dialect quirks that drive
//! synthesis. Both are built once per session and never shared across sessions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A feature flag value: a boolean, a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Truthiness: `true`, a non-zero number, or a non-empty string other than "OFF"/"0".
    pub fn is_enabled(&self) -> bool {
        match self {
            FeatureValue::Bool(b) => *b,
            FeatureValue::Number(n) => *n != 0.0,
            FeatureValue::Text(s) => {
                !s.is_empty() && !matches!(s.to_ascii_uppercase().as_str(), "OFF" | "0" | "FALSE")
            }
        }
    }

    /// Interpret a raw probe cell: numbers stay numeric, everything else is text.
    pub fn from_probe_text(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => FeatureValue::Number(n),
            _ => FeatureValue::Text(raw.to_string()),
        }
    }
}

impl Default for FeatureValue {
    fn default() -> Self {
        FeatureValue::Bool(true)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_identifier_len: usize,
    pub max_params: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_identifier_len: 63,
            max_params: 65_535,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSurface {
    pub supports: BTreeSet<String>,
    pub reserved_words: BTreeSet<String>,
}

/// Whether the session's channel is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsState {
    On,
    Off,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPosture {
    pub tls: TlsState,
    pub trust: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Server version, feature flags, limits and security posture of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMatrix {
    /// Server version text, or `"unknown"` when the version probe failed
    pub version: String,
    pub features: BTreeMap<String, FeatureValue>,
    pub limits: Limits,
    pub sql: SqlSurface,
    pub security: SecurityPosture,
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            features: BTreeMap::new(),
            limits: Limits::default(),
            sql: SqlSurface::default(),
            security: SecurityPosture::default(),
        }
    }
}

impl CapabilityMatrix {
    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    /// Is the named feature present and truthy? Absent features are off.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.features.get(name).is_some_and(FeatureValue::is_enabled)
    }

    /// Case-insensitive check of the declared SQL surface.
    pub fn supports(&self, keyword: &str) -> bool {
        self.sql.supports.contains(&keyword.to_ascii_uppercase())
    }

    pub fn is_reserved(&self, word: &str) -> bool {
        self.sql.reserved_words.contains(&word.to_ascii_uppercase())
    }
}

/// Identifier quote style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuoteStyle {
    /// `"name"`
    #[default]
    #[serde(rename = "\"")]
    Double,
    /// `` `name` ``
    #[serde(rename = "`")]
    Backtick,
    /// `[name]`
    #[serde(rename = "[")]
    Bracket,
}

impl QuoteStyle {
    pub const fn open(self) -> char {
        match self {
            QuoteStyle::Double => '"',
            QuoteStyle::Backtick => '`',
            QuoteStyle::Bracket => '[',
        }
    }

    pub const fn close(self) -> char {
        match self {
            QuoteStyle::Double => '"',
            QuoteStyle::Backtick => '`',
            QuoteStyle::Bracket => ']',
        }
    }
}

/// Quote an identifier, doubling the closing quote character inside it.
pub fn quote_ident(style: QuoteStyle, name: &str) -> String {
    let close = style.close();
    let mut out = String::with_capacity(name.len() + 2);
    out.push(style.open());
    for ch in name.chars() {
        if ch == close {
            out.push(close);
        }
        out.push(ch);
    }
    out.push(close);
    out
}

/// Inverse of [`quote_ident`]. Returns `None` if `quoted` is not a single quoted identifier.
pub fn unquote_ident(style: QuoteStyle, quoted: &str) -> Option<String> {
    let close = style.close();
    let inner = quoted.strip_prefix(style.open())?.strip_suffix(close)?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == close {
            // An interior close quote must be doubled
            if chars.next() != Some(close) {
                return None;
            }
        }
        out.push(ch);
    }
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    #[default]
    Json,
    Jsonb,
    Text,
}

impl JsonType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            JsonType::Json => "json",
            JsonType::Jsonb => "jsonb",
            JsonType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpsertDialect {
    OnConflict,
    OnDuplicate,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoolType {
    #[default]
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "tinyint(1)")]
    TinyInt1,
}

impl BoolType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            BoolType::Boolean => "boolean",
            BoolType::TinyInt1 => "tinyint(1)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampType {
    #[serde(rename = "timestamp with time zone")]
    WithTimeZone,
    #[default]
    #[serde(rename = "timestamp")]
    Timestamp,
    #[serde(rename = "datetime")]
    Datetime,
}

impl TimestampType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            TimestampType::WithTimeZone => "timestamp with time zone",
            TimestampType::Timestamp => "timestamp",
            TimestampType::Datetime => "datetime",
        }
    }
}

/// Empirically learned SQL-dialect quirks of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMap {
    pub quote: QuoteStyle,
    pub if_exists: bool,
    pub if_not_exists: bool,
    pub json_type: JsonType,
    pub returning: bool,
    pub upsert: UpsertDialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_alter_hint: Option<String>,
    /// `CREATE INDEX CONCURRENTLY` is accepted.
    #[serde(default)]
    pub concurrent_index: bool,
    pub bool_type: BoolType,
    pub timestamp_type: TimestampType,
    #[serde(rename = "transactionalDDL")]
    pub transactional_ddl: bool,
    pub max_ident_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_fingerprint: Option<String>,
    #[serde(default)]
    pub auth_methods: Vec<String>,
}

impl Default for FeatureMap {
    /// Conservative ANSI assumptions, used before anything has been learned.
    fn default() -> Self {
        Self {
            quote: QuoteStyle::Double,
            if_exists: false,
            if_not_exists: false,
            json_type: JsonType::Text,
            returning: false,
            upsert: UpsertDialect::None,
            online_alter_hint: None,
            concurrent_index: false,
            bool_type: BoolType::Boolean,
            timestamp_type: TimestampType::Timestamp,
            transactional_ddl: false,
            max_ident_len: 63,
            server_fingerprint: None,
            auth_methods: Vec::new(),
        }
    }
}

impl FeatureMap {
    /// What probing a modern MySQL server yields.
    pub fn mysql() -> Self {
        Self {
            quote: QuoteStyle::Backtick,
            if_exists: true,
            if_not_exists: true,
            json_type: JsonType::Json,
            returning: false,
            upsert: UpsertDialect::OnDuplicate,
            online_alter_hint: Some("ALGORITHM=INPLACE,LOCK=NONE".to_string()),
            concurrent_index: false,
            bool_type: BoolType::Boolean,
            timestamp_type: TimestampType::Timestamp,
            transactional_ddl: false,
            max_ident_len: 64,
            server_fingerprint: None,
            auth_methods: Vec::new(),
        }
    }

    /// What probing a modern PostgreSQL server yields.
    pub fn postgres() -> Self {
        Self {
            quote: QuoteStyle::Double,
            if_exists: true,
            if_not_exists: true,
            json_type: JsonType::Json,
            returning: true,
            upsert: UpsertDialect::OnConflict,
            online_alter_hint: None,
            concurrent_index: true,
            bool_type: BoolType::Boolean,
            timestamp_type: TimestampType::WithTimeZone,
            transactional_ddl: true,
            max_ident_len: 63,
            server_fingerprint: None,
            auth_methods: Vec::new(),
        }
    }

    /// Quote an identifier with the learned quote style.
    pub fn quote(&self, name: &str) -> String {
        quote_ident(self.quote, name)
    }
}

impl fmt::Display for QuoteStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.open())
    }
}
