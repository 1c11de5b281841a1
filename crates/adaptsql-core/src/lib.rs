//! Core types and contracts for AdaptSQL.
//!
//! This crate provides the pieces every dialect transport, the learner and the
//! planner agree on:
//!
//! - `Transport` trait and `Session` for live connections
//! - `Error` taxonomy shared by protocol, planning and apply failures
//! - `Value`/`Row` result types and client-side placeholder interpolation
//! - `ConnectUrl`/`Policy` configuration
//! - Wire-pack manifests and the scheme `Registry`
//! - `CapabilityMatrix`/`FeatureMap` learned capability records
//! - `Observer` for optional instrumentation

pub mod capability;
pub mod config;
pub mod error;
pub mod manifest;
pub mod observe;
pub mod params;
pub mod report;
pub mod row;
pub mod stream;
pub mod transport;
pub mod value;

pub use capability::{
    BoolType, CapabilityMatrix, FeatureMap, FeatureValue, JsonType, Limits, QuoteStyle,
    SecurityPosture, SqlSurface, TimestampType, TlsState, UpsertDialect, quote_ident,
    unquote_ident,
};
pub use config::{ConnectUrl, Policy, SslMode, is_localhost};
pub use error::{Error, Result};
pub use manifest::{Registry, WirePack};
pub use observe::{NoopObserver, Observer};
pub use params::interpolate_params;
pub use report::{ApplyAction, ApplyReport};
pub use row::{ColumnInfo, Row};
pub use stream::{NetStream, validate_tls};
pub use transport::{Dialect, ExecRequest, ExecResult, Session, SessionMeta, TlsInfo, Transport};
pub use value::Value;
