//! Schema IR, SQL synthesis and migration planning for AdaptSQL.
//!
//! This crate provides:
//! - The dialect-agnostic IR: [`ColumnSpec`], [`Op`], [`Plan`], [`SchemaSnapshot`]
//! - [`render_sql`]: one statement per op, shaped by a learned [`FeatureMap`]
//! - [`diff_snapshots`]: structural delta between two snapshots, risk-graded
//! - [`schema_improve`]: goal-directed plans gated on learned capabilities
//! - [`apply`]: strictly ordered, fail-fast execution with an [`ApplyReport`]
//! - [`snapshot`]: live introspection of a connected database
//!
//! [`FeatureMap`]: adaptsql_core::FeatureMap
//! [`ApplyReport`]: adaptsql_core::ApplyReport

pub mod apply;
pub mod diff;
pub mod introspect;
pub mod ir;
pub mod planner;
pub mod synth;

pub use apply::{ApplyOptions, apply};
pub use diff::diff_snapshots;
pub use introspect::snapshot;
pub use ir::{
    ColumnSpec, IndexBuild, IndexSnapshot, LogicalType, Op, Plan, Risk, SchemaSnapshot,
    TableSnapshot,
};
pub use planner::{Goal, PlanTarget, schema_improve};
pub use synth::{render_plan, render_sql, type_sql, validate_plan};
