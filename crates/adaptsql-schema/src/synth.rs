//! SQL synthesis from IR ops under a learned [`FeatureMap`].
//!
//! [`render_sql`] is total: every op renders under every feature map.
//! Shapes that would render to something the server cannot run are caught
//! earlier by [`validate_plan`], before any SQL is sent.

use std::collections::{HashMap, HashSet};

use adaptsql_core::error::PlanError;
use adaptsql_core::{FeatureMap, Result};

use crate::ir::{ColumnSpec, IndexBuild, LogicalType, Op, Plan};

const DEFAULT_VARCHAR_LEN: u32 = 255;
const DEFAULT_DECIMAL_PRECISION: u32 = 10;
const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// Concrete SQL type for a column under the learned dialect.
pub fn type_sql(features: &FeatureMap, column: &ColumnSpec) -> String {
    match column.logical_type {
        LogicalType::String => format!("varchar({})", column.len.unwrap_or(DEFAULT_VARCHAR_LEN)),
        LogicalType::Text => "text".to_string(),
        LogicalType::Int => "integer".to_string(),
        LogicalType::BigInt => "bigint".to_string(),
        LogicalType::Bool => features.bool_type.as_sql().to_string(),
        LogicalType::Json => features.json_type.as_sql().to_string(),
        LogicalType::Decimal => format!(
            "decimal({},{})",
            column.len.unwrap_or(DEFAULT_DECIMAL_PRECISION),
            column.scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
        ),
        LogicalType::Ts => features.timestamp_type.as_sql().to_string(),
    }
}

/// `schema.name`, or just `name` when the schema is empty.
pub fn qualified(features: &FeatureMap, schema: &str, name: &str) -> String {
    if schema.is_empty() {
        features.quote(name)
    } else {
        format!("{}.{}", features.quote(schema), features.quote(name))
    }
}

fn column_def(features: &FeatureMap, column: &ColumnSpec) -> String {
    let mut sql = format!("{} {}", features.quote(&column.name), type_sql(features, column));
    if let Some(expr) = &column.generated_sql {
        sql.push_str(&format!(" GENERATED ALWAYS AS ({expr}) STORED"));
    }
    sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(expr) = &column.default_sql {
        sql.push_str(&format!(" DEFAULT {expr}"));
    }
    sql
}

fn column_list(features: &FeatureMap, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| features.quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one op as a single SQL statement.
pub fn render_sql(features: &FeatureMap, op: &Op) -> String {
    match op {
        Op::CreateTable {
            schema,
            name,
            columns,
            pk,
        } => {
            let mut defs: Vec<String> = columns.iter().map(|c| column_def(features, c)).collect();
            if let Some(pk) = pk.as_ref().filter(|pk| !pk.is_empty()) {
                defs.push(format!("PRIMARY KEY ({})", column_list(features, pk)));
            }
            format!(
                "CREATE TABLE{} {} ({})",
                if features.if_not_exists { " IF NOT EXISTS" } else { "" },
                qualified(features, schema, name),
                defs.join(", ")
            )
        }
        Op::AddColumn {
            schema,
            table,
            column,
        } => format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualified(features, schema, table),
            column_def(features, column)
        ),
        Op::AddIndex {
            schema,
            table,
            name,
            columns,
            unique,
            build,
        } => {
            let unique = if *unique { "UNIQUE " } else { "" };
            let target = qualified(features, schema, table);
            let cols = column_list(features, columns);
            match (build, features.online_alter_hint.as_deref()) {
                (IndexBuild::Online, Some(hint)) => format!(
                    "ALTER TABLE {target} ADD {unique}INDEX {} ({cols}), {hint}",
                    features.quote(name)
                ),
                (IndexBuild::Concurrent, _) => format!(
                    "CREATE {unique}INDEX CONCURRENTLY {} ON {target} ({cols})",
                    features.quote(name)
                ),
                _ => format!(
                    "CREATE {unique}INDEX {} ON {target} ({cols})",
                    features.quote(name)
                ),
            }
        }
        Op::DropTable { schema, name } => format!(
            "DROP TABLE{} {}",
            if features.if_exists { " IF EXISTS" } else { "" },
            qualified(features, schema, name)
        ),
        Op::ExecSql { sql, .. } => sql.clone(),
    }
}

/// Render every op of a plan, in order.
pub fn render_plan(features: &FeatureMap, plan: &Plan) -> Vec<String> {
    plan.ops.iter().map(|op| render_sql(features, op)).collect()
}

// ============================================================================
// Validation
// ============================================================================

/// Reject plans that cannot be rendered correctly under `features`.
///
/// Columns of tables created earlier in the same plan are tracked so that
/// later `AddColumn`/`AddIndex` ops against them are checked too.
pub fn validate_plan(features: &FeatureMap, plan: &Plan) -> Result<()> {
    let mut known: HashMap<(String, String), HashSet<String>> = HashMap::new();
    for (step, op) in plan.ops.iter().enumerate() {
        validate_op(features, step, op, &mut known)?;
    }
    Ok(())
}

fn validate_op(
    features: &FeatureMap,
    step: usize,
    op: &Op,
    known: &mut HashMap<(String, String), HashSet<String>>,
) -> std::result::Result<(), PlanError> {
    let ident = |what: &str, name: &str| check_ident(features, step, what, name);
    let schema_ident = |schema: &str| {
        if schema.is_empty() {
            Ok(())
        } else {
            check_ident(features, step, "schema", schema)
        }
    };

    match op {
        Op::CreateTable {
            schema,
            name,
            columns,
            pk,
        } => {
            schema_ident(schema)?;
            ident("table", name)?;
            if columns.is_empty() {
                return Err(PlanError::at(step, format!("table {name} has no columns")));
            }
            let mut seen = HashSet::new();
            for column in columns {
                check_column(features, step, column)?;
                if !seen.insert(column.name.clone()) {
                    return Err(PlanError::at(
                        step,
                        format!("duplicate column {} in table {name}", column.name),
                    ));
                }
            }
            for col in pk.iter().flatten() {
                if !seen.contains(col) {
                    return Err(PlanError::at(
                        step,
                        format!("primary key column {col} is not declared on {name}"),
                    ));
                }
            }
            known.insert((schema.clone(), name.clone()), seen);
        }
        Op::AddColumn {
            schema,
            table,
            column,
        } => {
            schema_ident(schema)?;
            ident("table", table)?;
            check_column(features, step, column)?;
            if let Some(cols) = known.get_mut(&(schema.clone(), table.clone())) {
                if !cols.insert(column.name.clone()) {
                    return Err(PlanError::at(
                        step,
                        format!("column {} already exists on {table}", column.name),
                    ));
                }
            }
        }
        Op::AddIndex {
            schema,
            table,
            name,
            columns,
            build,
            ..
        } => {
            schema_ident(schema)?;
            ident("table", table)?;
            ident("index", name)?;
            if columns.is_empty() {
                return Err(PlanError::at(step, format!("index {name} has no columns")));
            }
            for col in columns {
                ident("column", col)?;
            }
            if let Some(cols) = known.get(&(schema.clone(), table.clone())) {
                if let Some(missing) = columns.iter().find(|c| !cols.contains(*c)) {
                    return Err(PlanError::at(
                        step,
                        format!("index {name} references undeclared column {missing}"),
                    ));
                }
            }
            if *build == IndexBuild::Online && features.online_alter_hint.is_none() {
                return Err(PlanError::at(
                    step,
                    format!("online build of index {name} needs an online-alter hint"),
                ));
            }
            if *build == IndexBuild::Concurrent && !features.concurrent_index {
                return Err(PlanError::at(
                    step,
                    format!("server does not accept CREATE INDEX CONCURRENTLY for {name}"),
                ));
            }
        }
        Op::DropTable { schema, name } => {
            schema_ident(schema)?;
            ident("table", name)?;
            known.remove(&(schema.clone(), name.clone()));
        }
        Op::ExecSql { sql, .. } => {
            if sql.trim().is_empty() {
                return Err(PlanError::at(step, "empty SQL statement"));
            }
        }
    }
    Ok(())
}

fn check_ident(
    features: &FeatureMap,
    step: usize,
    what: &str,
    name: &str,
) -> std::result::Result<(), PlanError> {
    if name.is_empty() {
        return Err(PlanError::at(step, format!("empty {what} name")));
    }
    let len = name.chars().count();
    if len > features.max_ident_len {
        return Err(PlanError::at(
            step,
            format!(
                "{what} name {name} is {len} characters, limit is {}",
                features.max_ident_len
            ),
        ));
    }
    Ok(())
}

fn check_column(
    features: &FeatureMap,
    step: usize,
    column: &ColumnSpec,
) -> std::result::Result<(), PlanError> {
    check_ident(features, step, "column", &column.name)?;
    if column.default_sql.is_some() && column.generated_sql.is_some() {
        return Err(PlanError::at(
            step,
            format!("column {} has both a default and a generated expression", column.name),
        ));
    }
    match column.logical_type {
        LogicalType::String if column.len == Some(0) => Err(PlanError::at(
            step,
            format!("column {} has zero length", column.name),
        )),
        LogicalType::Decimal => {
            let precision = column.len.unwrap_or(DEFAULT_DECIMAL_PRECISION);
            let scale = column.scale.unwrap_or(DEFAULT_DECIMAL_SCALE);
            if precision == 0 || scale > precision {
                Err(PlanError::at(
                    step,
                    format!(
                        "column {} has decimal({precision},{scale}); scale must not exceed precision",
                        column.name
                    ),
                ))
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
