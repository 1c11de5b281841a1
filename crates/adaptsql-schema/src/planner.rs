//! Goal-directed plans conditioned on learned capabilities.

use std::collections::BTreeSet;

use adaptsql_core::error::PlanError;
use adaptsql_core::{CapabilityMatrix, Dialect, FeatureMap, Result};
use serde::{Deserialize, Serialize};

use crate::ir::{IndexBuild, Op, Plan, Risk, SchemaSnapshot};
use crate::synth::{qualified, validate_plan};

/// Feature flag that unlocks non-blocking index builds.
pub const CONCURRENT_INDEX_FEATURE: &str = "concurrentIndexCreate";

/// What a caller wants improved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "goal", rename_all = "camelCase")]
pub enum Goal {
    /// Make lookups on `columns` indexed.
    #[serde(rename_all = "camelCase")]
    IndexColumns {
        schema: String,
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Refresh planner statistics once the other steps are done. Without a
    /// table, every table touched by the plan is analyzed.
    #[serde(rename_all = "camelCase")]
    ReduceLatency {
        #[serde(default)]
        schema: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
}

/// What the planner knows about the target session.
#[derive(Debug, Clone, Copy)]
pub struct PlanTarget<'a> {
    pub dialect: Dialect,
    pub features: &'a FeatureMap,
    pub matrix: &'a CapabilityMatrix,
    /// When present, index goals already satisfied by an existing index are dropped.
    pub snapshot: Option<&'a SchemaSnapshot>,
}

impl<'a> PlanTarget<'a> {
    pub fn new(dialect: Dialect, features: &'a FeatureMap, matrix: &'a CapabilityMatrix) -> Self {
        Self {
            dialect,
            features,
            matrix,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: &'a SchemaSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// The least disruptive index build the server supports. A concurrent
    /// build needs both the declared capability and the probed syntax.
    pub fn index_build(&self) -> IndexBuild {
        if self.matrix.is_enabled(CONCURRENT_INDEX_FEATURE) && self.features.concurrent_index {
            IndexBuild::Concurrent
        } else if self.features.online_alter_hint.is_some() {
            IndexBuild::Online
        } else {
            IndexBuild::Blocking
        }
    }
}

/// Build a plan that satisfies `goals` on the target.
///
/// Index goals become `AddIndex` ops using [`PlanTarget::index_build`]; a
/// latency goal appends one `ANALYZE` step per affected table at the end.
/// The plan is validated before it is returned.
pub fn schema_improve(target: &PlanTarget<'_>, goals: &[Goal]) -> Result<Plan> {
    let build = target.index_build();
    let mut ops = Vec::new();
    let mut notes = Vec::new();
    let mut touched: BTreeSet<(String, String)> = BTreeSet::new();
    let mut analyze: Vec<(String, Option<String>)> = Vec::new();
    let mut risk = Risk::Low;

    for goal in goals {
        match goal {
            Goal::IndexColumns {
                schema,
                table,
                columns,
                unique,
                name,
            } => {
                if columns.is_empty() {
                    return Err(PlanError::new(format!("index goal on {table} names no columns")).into());
                }
                let existing = target
                    .snapshot
                    .and_then(|s| s.table(schema, table))
                    .and_then(|t| t.index_on(columns));
                if let Some(index) = existing {
                    if index.unique || !unique {
                        notes.push(format!("{table}({}) already indexed by {}", columns.join(", "), index.name));
                        continue;
                    }
                }
                let name = name
                    .clone()
                    .unwrap_or_else(|| index_name(table, columns, target.features.max_ident_len));
                if *unique || build == IndexBuild::Blocking {
                    risk = risk.max(Risk::Medium);
                }
                touched.insert((schema.clone(), table.clone()));
                ops.push(Op::AddIndex {
                    schema: schema.clone(),
                    table: table.clone(),
                    name,
                    columns: columns.clone(),
                    unique: *unique,
                    build,
                });
            }
            Goal::ReduceLatency { schema, table } => {
                analyze.push((schema.clone(), table.clone()));
            }
        }
    }

    let mut analyzed = BTreeSet::new();
    for (schema, table) in analyze {
        let targets: Vec<(String, Option<String>)> = match table {
            Some(t) => vec![(schema, Some(t))],
            None if touched.is_empty() => vec![(schema, None)],
            None => touched.iter().map(|(s, t)| (s.clone(), Some(t.clone()))).collect(),
        };
        for (schema, table) in targets {
            if !analyzed.insert((schema.clone(), table.clone())) {
                continue;
            }
            ops.push(Op::ExecSql {
                sql: analyze_sql(target, &schema, table.as_deref())?,
                unsafe_: false,
            });
        }
    }

    let mut plan = Plan::new(ops, risk);
    validate_plan(target.features, &plan)?;
    tracing::debug!(ops = plan.len(), ?build, ?risk, "improvement plan");
    if !notes.is_empty() {
        plan = plan.with_summary(format!("skipped: {}", notes.join("; ")));
    }
    Ok(plan)
}

fn analyze_sql(target: &PlanTarget<'_>, schema: &str, table: Option<&str>) -> Result<String> {
    let features = target.features;
    match (target.dialect, table) {
        (Dialect::Postgres, Some(t)) => Ok(format!("ANALYZE {}", qualified(features, schema, t))),
        (Dialect::Postgres, None) => Ok("ANALYZE".to_string()),
        (Dialect::Mysql, Some(t)) => Ok(format!("ANALYZE TABLE {}", qualified(features, schema, t))),
        (Dialect::Mysql, None) => Err(PlanError::new(
            "latency goal needs a table: ANALYZE TABLE has no database-wide form",
        )
        .into()),
    }
}

/// `idx_<table>_<cols>`, cut to the identifier limit.
fn index_name(table: &str, columns: &[String], max_len: usize) -> String {
    let full = format!("idx_{table}_{}", columns.join("_"));
    full.chars().take(max_len.max(1)).collect()
}
