//! Error types for AdaptSQL operations.

use crate::report::ApplyReport;
use std::fmt;

/// The primary error type for all AdaptSQL operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authentication, TLS, disconnect)
    Connection(ConnectionError),
    /// Query execution errors (ERR packet / ErrorResponse during exec)
    Query(QueryError),
    /// Protocol errors (wire-level, always fatal to the session)
    Protocol(ProtocolError),
    /// An `Op` cannot be rendered or a goal cannot be satisfied
    Plan(PlanError),
    /// A plan step failed during apply
    Apply(ApplyError),
    /// Configuration errors (URL, registry, manifest)
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// No bytes arrived within the configured deadline
    Timeout,
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// SSL/TLS negotiation or validation failed
    Ssl,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    /// Server error code (MySQL error number, 0 when not provided)
    pub code: u16,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    /// Index of the offending op, when the error concerns a single op
    pub step: Option<usize>,
    pub message: String,
}

/// A plan step failed. Carries the report of every step attempted so far.
#[derive(Debug)]
pub struct ApplyError {
    pub step: usize,
    pub sql: String,
    /// Every step attempted, up to and including the failure
    pub report: ApplyReport,
    pub source: Box<Error>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Did authentication fail (server ERR during login, strategies exhausted)?
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Connection(c) if c.kind == ConnectionErrorKind::Authentication)
    }

    /// Did the pending call run out of time?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Is the session unusable after this error?
    ///
    /// Query errors leave the session usable; plan errors never touch it.
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Error::Protocol(_) | Error::Io(_) | Error::Timeout => true,
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Refused
                    | ConnectionErrorKind::Ssl
            ),
            Error::Apply(e) => e.source.is_fatal_to_session(),
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "42S02" for unknown table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::Apply(a) => a.source.sqlstate(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Apply(a) => Some(&a.sql),
            _ => None,
        }
    }
}

impl PlanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            step: None,
            message: message.into(),
        }
    }

    pub fn at(step: usize, message: impl Into<String>) -> Self {
        Self {
            step: Some(step),
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => match e.kind {
                ConnectionErrorKind::Authentication => {
                    write!(f, "Authentication error: {}", e.message)
                }
                _ => write!(f, "Connection error: {}", e.message),
            },
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Plan(e) => write!(f, "Plan error: {}", e),
            Error::Apply(e) => write!(f, "Apply error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Apply(e) => Some(e.source.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code != 0 {
            write!(f, "{} ", self.code)?;
        }
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "({}) ", sqlstate)?;
        }
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "op {}: {}", step, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} failed: {}", self.step, self.source)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<PlanError> for Error {
    fn from(err: PlanError) -> Self {
        Error::Plan(err)
    }
}

impl From<ApplyError> for Error {
    fn from(err: ApplyError) -> Self {
        Error::Apply(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for AdaptSQL operations.
pub type Result<T> = std::result::Result<T, Error>;

pub fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

pub fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        source: None,
    })
}

pub fn tls_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Ssl,
        message: msg.into(),
        source: None,
    })
}

pub fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: msg.into(),
        source: None,
    })
}

/// Map a socket error to the taxonomy: read deadlines become `Timeout`,
/// a peer that went away becomes `Disconnected`.
pub fn io_to_error(err: std::io::Error, context: &str) -> Error {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("{context}: {err}"),
            source: Some(Box::new(err)),
        }),
        ErrorKind::ConnectionRefused => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Refused,
            message: format!("{context}: {err}"),
            source: Some(Box::new(err)),
        }),
        _ => Error::Protocol(ProtocolError {
            message: format!("{context}: {err}"),
            raw_data: None,
            source: Some(Box::new(err)),
        }),
    }
}
