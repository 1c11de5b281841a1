//! AdaptSQL - a capability-adaptive MySQL and PostgreSQL client.
//!
//! AdaptSQL speaks the native wire protocols directly, learns what the server
//! it is connected to can do, and plans schema changes that use only what was
//! learned:
//!
//! - [`connect`] / [`Connector`]: URL → wire pack → authenticated transport
//! - [`Driver`]: `ping`, `execute`, `explain`, `snapshot`, `capabilities`,
//!   `features`, `plan_diff`, `schema_improve`, `apply`, `close`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use adaptsql::{ApplyOptions, Goal, connect};
//!
//! let mut driver = connect("postgres://app@localhost/app")?;
//! let plan = driver.schema_improve(&[Goal::IndexColumns {
//!     schema: "public".into(),
//!     table: "orders".into(),
//!     columns: vec!["customer_id".into()],
//!     unique: false,
//!     name: None,
//! }])?;
//! let report = driver.apply(&plan, &ApplyOptions::dry_run())?;
//! for action in &report.actions {
//!     println!("{}", action.sql);
//! }
//! driver.close()?;
//! ```

pub mod connect;
pub mod driver;

pub use connect::{Connector, connect, open};
pub use driver::Driver;

pub use adaptsql_core::{
    ApplyAction, ApplyReport, CapabilityMatrix, ColumnInfo, ConnectUrl, Dialect, Error, ExecRequest,
    ExecResult, FeatureMap, FeatureValue, NoopObserver, Observer, Policy, QuoteStyle, Registry,
    Result, Row, Session, SessionMeta, SslMode, TlsInfo, Transport, Value, WirePack,
};
pub use adaptsql_learn::{LearnOptions, Learner};
pub use adaptsql_mysql::MySqlTransport;
pub use adaptsql_postgres::PgTransport;
pub use adaptsql_schema::{
    ApplyOptions, ColumnSpec, Goal, IndexBuild, IndexSnapshot, LogicalType, Op, Plan, PlanTarget,
    Risk, SchemaSnapshot, TableSnapshot, diff_snapshots, render_plan, render_sql, schema_improve,
    validate_plan,
};
