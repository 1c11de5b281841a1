//! Structural diff between two schema snapshots.
//!
//! The IR can only add tables, columns and indexes or drop whole tables, so
//! anything else that differs (removed or retyped columns, dropped indexes,
//! primary key changes) is reported in the plan summary as a skipped change
//! rather than silently ignored.

use std::collections::HashSet;

use crate::ir::{IndexBuild, Op, Plan, Risk, SchemaSnapshot, TableSnapshot};

/// Ops that turn `from` into `to`.
///
/// Emitted in a fixed order: new tables (each followed by its indexes), then
/// new columns and indexes on existing tables, then dropped tables.
pub fn diff_snapshots(from: &SchemaSnapshot, to: &SchemaSnapshot) -> Plan {
    let mut creates = Vec::new();
    let mut alters = Vec::new();
    let mut drops = Vec::new();
    let mut skipped = Vec::new();
    let mut risk = Risk::Low;

    for table in &to.tables {
        match from.table(&table.schema, &table.name) {
            None => {
                creates.push(Op::CreateTable {
                    schema: table.schema.clone(),
                    name: table.name.clone(),
                    columns: table.columns.clone(),
                    pk: (!table.primary_key.is_empty()).then(|| table.primary_key.clone()),
                });
                for index in &table.indexes {
                    creates.push(add_index(table, &index.name, &index.columns, index.unique));
                }
            }
            Some(current) => {
                risk = risk.max(diff_table(current, table, &mut alters, &mut skipped));
            }
        }
    }

    let wanted: HashSet<(&str, &str)> = to
        .tables
        .iter()
        .map(|t| (t.schema.as_str(), t.name.as_str()))
        .collect();
    for table in &from.tables {
        if !wanted.contains(&(table.schema.as_str(), table.name.as_str())) {
            drops.push(Op::DropTable {
                schema: table.schema.clone(),
                name: table.name.clone(),
            });
            risk = Risk::High;
        }
    }

    if !skipped.is_empty() {
        risk = risk.max(Risk::Medium);
    }

    let mut ops = creates;
    ops.append(&mut alters);
    ops.append(&mut drops);

    tracing::debug!(ops = ops.len(), skipped = skipped.len(), ?risk, "snapshot diff");

    let plan = Plan::new(ops, risk);
    if plan.is_empty() && skipped.is_empty() {
        return plan;
    }
    let mut summary = format!("{} operation(s)", plan.len());
    if !skipped.is_empty() {
        summary.push_str(&format!("; skipped: {}", skipped.join("; ")));
    }
    plan.with_summary(summary)
}

fn diff_table(
    current: &TableSnapshot,
    wanted: &TableSnapshot,
    ops: &mut Vec<Op>,
    skipped: &mut Vec<String>,
) -> Risk {
    let mut risk = Risk::Low;
    let label = format!("{}.{}", wanted.schema, wanted.name);

    for column in &wanted.columns {
        match current.find_column(&column.name) {
            None => {
                if column.needs_backfill() {
                    risk = risk.max(Risk::Medium);
                }
                ops.push(Op::AddColumn {
                    schema: wanted.schema.clone(),
                    table: wanted.name.clone(),
                    column: column.clone(),
                });
            }
            Some(existing) if existing != column => {
                skipped.push(format!("column {label}.{} changed", column.name));
            }
            Some(_) => {}
        }
    }
    for column in &current.columns {
        if wanted.find_column(&column.name).is_none() {
            skipped.push(format!("column {label}.{} removed", column.name));
        }
    }

    if current.primary_key != wanted.primary_key {
        skipped.push(format!("primary key of {label} changed"));
    }

    for index in &wanted.indexes {
        match current.indexes.iter().find(|i| i.name == index.name) {
            None => {
                if index.unique {
                    risk = risk.max(Risk::Medium);
                }
                ops.push(add_index(wanted, &index.name, &index.columns, index.unique));
            }
            Some(existing) if existing != index => {
                skipped.push(format!("index {} on {label} changed", index.name));
            }
            Some(_) => {}
        }
    }
    for index in &current.indexes {
        if !wanted.indexes.iter().any(|i| i.name == index.name) {
            skipped.push(format!("index {} on {label} removed", index.name));
        }
    }

    risk
}

fn add_index(table: &TableSnapshot, name: &str, columns: &[String], unique: bool) -> Op {
    Op::AddIndex {
        schema: table.schema.clone(),
        table: table.name.clone(),
        name: name.to_string(),
        columns: columns.to_vec(),
        unique,
        build: IndexBuild::Blocking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ColumnSpec, IndexSnapshot, LogicalType};

    fn users() -> TableSnapshot {
        TableSnapshot::new("app", "users")
            .column(ColumnSpec::new("id", LogicalType::BigInt).not_null())
            .column(ColumnSpec::new("email", LogicalType::String).len(320))
            .primary_key(["id"])
            .index(IndexSnapshot {
                name: "idx_users_email".to_string(),
                columns: vec!["email".to_string()],
                unique: false,
            })
    }

    fn orders() -> TableSnapshot {
        TableSnapshot::new("app", "orders")
            .column(ColumnSpec::new("id", LogicalType::BigInt).not_null())
            .column(ColumnSpec::new("meta", LogicalType::Json))
    }

    #[test]
    fn test_identical_snapshots_diff_to_nothing() {
        for snapshot in [
            SchemaSnapshot::default(),
            SchemaSnapshot::new(vec![users()]),
            SchemaSnapshot::new(vec![users(), orders()]),
        ] {
            let plan = diff_snapshots(&snapshot, &snapshot);
            assert!(plan.ops.is_empty());
            assert_eq!(plan.risk, Risk::Low);
            assert_eq!(plan.summary, None);
        }
    }

    #[test]
    fn test_new_table_is_low_risk() {
        let from = SchemaSnapshot::new(vec![orders()]);
        let to = SchemaSnapshot::new(vec![users(), orders()]);
        let plan = diff_snapshots(&from, &to);

        assert_eq!(plan.risk, Risk::Low);
        assert_eq!(plan.ops.len(), 2);
        match &plan.ops[0] {
            Op::CreateTable { name, pk, columns, .. } => {
                assert_eq!(name, "users");
                assert_eq!(pk.as_deref(), Some(&["id".to_string()][..]));
                assert_eq!(columns.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&plan.ops[1], Op::AddIndex { name, .. } if name == "idx_users_email"));
    }

    #[test]
    fn test_drop_table_is_high_risk_and_last() {
        let from = SchemaSnapshot::new(vec![orders()]);
        let to = SchemaSnapshot::new(vec![users()]);
        let plan = diff_snapshots(&from, &to);

        assert_eq!(plan.risk, Risk::High);
        assert!(matches!(plan.ops.first(), Some(Op::CreateTable { .. })));
        assert!(matches!(plan.ops.last(), Some(Op::DropTable { name, .. }) if name == "orders"));
    }

    #[test]
    fn test_not_null_column_without_default_is_medium() {
        let from = SchemaSnapshot::new(vec![orders()]);
        let mut wider = orders();
        wider.columns.push(ColumnSpec::new("status", LogicalType::String).not_null());
        wider.columns.push(ColumnSpec::new("note", LogicalType::Text));
        let plan = diff_snapshots(&from, &SchemaSnapshot::new(vec![wider]));

        assert_eq!(plan.risk, Risk::Medium);
        assert_eq!(plan.ops.len(), 2);
        assert!(plan.ops.iter().all(|op| matches!(op, Op::AddColumn { .. })));
    }

    #[test]
    fn test_unique_index_on_existing_table_is_medium() {
        let from = SchemaSnapshot::new(vec![orders()]);
        let to = SchemaSnapshot::new(vec![orders().index(IndexSnapshot {
            name: "uq_orders_id".to_string(),
            columns: vec!["id".to_string()],
            unique: true,
        })]);
        let plan = diff_snapshots(&from, &to);
        assert_eq!(plan.risk, Risk::Medium);
        assert!(matches!(&plan.ops[0], Op::AddIndex { unique: true, .. }));
    }

    #[test]
    fn test_inexpressible_changes_are_listed() {
        let from = SchemaSnapshot::new(vec![users()]);
        let mut changed = users();
        changed.columns[1] = ColumnSpec::new("email", LogicalType::Text);
        changed.columns.remove(0);
        changed.primary_key.clear();
        changed.indexes.clear();
        let plan = diff_snapshots(&from, &SchemaSnapshot::new(vec![changed]));

        assert!(plan.ops.is_empty());
        assert_eq!(plan.risk, Risk::Medium);
        let summary = plan.summary.unwrap();
        assert!(summary.contains("column app.users.email changed"), "{summary}");
        assert!(summary.contains("column app.users.id removed"), "{summary}");
        assert!(summary.contains("primary key of app.users changed"), "{summary}");
        assert!(summary.contains("index idx_users_email on app.users removed"), "{summary}");
    }
}
