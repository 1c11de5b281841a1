//! Live schema snapshots via `information_schema` and the index catalogs.

use std::collections::BTreeMap;

use adaptsql_core::{Dialect, ExecResult, Result, Row, Transport, Value};

use crate::ir::{ColumnSpec, IndexSnapshot, LogicalType, SchemaSnapshot, TableSnapshot};

/// Schemas that belong to the server, never to the application.
pub const SYSTEM_SCHEMAS: [&str; 6] = [
    "information_schema",
    "mysql",
    "performance_schema",
    "sys",
    "pg_catalog",
    "pg_toast",
];

type TableKey = (String, String);

/// Read tables, columns, primary keys and indexes of the connected database.
///
/// On MySQL only the session's current database is read when the URL named
/// one; on PostgreSQL every non-system schema of the current database is.
#[tracing::instrument(level = "debug", skip_all)]
pub fn snapshot(transport: &mut dyn Transport) -> Result<SchemaSnapshot> {
    let dialect = transport.dialect();
    let database = transport.session().meta.database.clone();
    let scope = Scope {
        dialect,
        current_db_only: dialect == Dialect::Mysql && database.is_some(),
    };

    let mut tables: BTreeMap<TableKey, TableSnapshot> = BTreeMap::new();
    for row in &transport.query(&scope.tables_sql())?.rows {
        let (schema, name) = (cell(row, 0), cell(row, 1));
        tables.insert(
            (schema.to_string(), name.to_string()),
            TableSnapshot::new(schema, name),
        );
    }

    for row in &transport.query(&scope.columns_sql())?.rows {
        if let Some(table) = tables.get_mut(&key(row)) {
            table.columns.push(column_from_row(dialect, row));
        }
    }

    for row in &transport.query(&scope.primary_keys_sql())?.rows {
        if let Some(table) = tables.get_mut(&key(row)) {
            table.primary_key.push(cell(row, 2).to_string());
        }
    }

    add_indexes(&mut tables, &transport.query(&scope.indexes_sql())?);

    let snapshot = SchemaSnapshot {
        version: 1,
        database,
        tables: tables.into_values().collect(),
    };
    tracing::debug!(tables = snapshot.tables.len(), "schema snapshot taken");
    Ok(snapshot)
}

struct Scope {
    dialect: Dialect,
    current_db_only: bool,
}

impl Scope {
    fn filter(&self, column: &str) -> String {
        let excluded = SYSTEM_SCHEMAS
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("{column} NOT IN ({excluded})");
        match self.dialect {
            Dialect::Mysql if self.current_db_only => {
                sql.push_str(&format!(" AND {column} = DATABASE()"));
            }
            Dialect::Postgres => {
                sql.push_str(&format!(
                    " AND {column} NOT LIKE 'pg_temp%' AND {column} NOT LIKE 'pg_toast_temp%'"
                ));
            }
            Dialect::Mysql => {}
        }
        sql
    }

    fn tables_sql(&self) -> String {
        format!(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND {} ORDER BY table_schema, table_name",
            self.filter("table_schema")
        )
    }

    fn columns_sql(&self) -> String {
        let native = match self.dialect {
            Dialect::Mysql => "column_type",
            Dialect::Postgres => "udt_name",
        };
        format!(
            "SELECT table_schema, table_name, column_name, data_type, character_maximum_length, \
             numeric_precision, numeric_scale, is_nullable, column_default, {native} \
             FROM information_schema.columns WHERE {} \
             ORDER BY table_schema, table_name, ordinal_position",
            self.filter("table_schema")
        )
    }

    fn primary_keys_sql(&self) -> String {
        format!(
            "SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
             ON kcu.constraint_schema = tc.constraint_schema \
             AND kcu.constraint_name = tc.constraint_name \
             AND kcu.table_name = tc.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND {} \
             ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position",
            self.filter("tc.table_schema")
        )
    }

    fn indexes_sql(&self) -> String {
        match self.dialect {
            Dialect::Mysql => format!(
                "SELECT table_schema, table_name, index_name, column_name, non_unique = 0 \
                 FROM information_schema.statistics \
                 WHERE index_name <> 'PRIMARY' AND {} \
                 ORDER BY table_schema, table_name, index_name, seq_in_index",
                self.filter("table_schema")
            ),
            Dialect::Postgres => format!(
                "SELECT n.nspname, t.relname, i.relname, a.attname, ix.indisunique \
                 FROM pg_index ix \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_class t ON t.oid = ix.indrelid \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
                 WHERE NOT ix.indisprimary AND {} \
                 ORDER BY n.nspname, t.relname, i.relname, k.ord",
                self.filter("n.nspname")
            ),
        }
    }
}

fn cell(row: &Row, index: usize) -> &str {
    row.get(index).and_then(Value::as_str).unwrap_or_default()
}

fn number(row: &Row, index: usize) -> Option<u32> {
    row.get(index)
        .and_then(Value::as_i64)
        .and_then(|n| u32::try_from(n).ok())
}

fn key(row: &Row) -> TableKey {
    (cell(row, 0).to_string(), cell(row, 1).to_string())
}

fn column_from_row(dialect: Dialect, row: &Row) -> ColumnSpec {
    let data_type = cell(row, 3).to_ascii_lowercase();
    let native = cell(row, 9).to_ascii_lowercase();
    let logical_type = logical_type(&data_type, &native);

    let mut column = ColumnSpec::new(cell(row, 2), logical_type);
    match logical_type {
        LogicalType::String => column.len = number(row, 4),
        LogicalType::Decimal => {
            column.len = number(row, 5);
            column.scale = number(row, 6);
        }
        _ => {}
    }
    column.nullable = cell(row, 7).eq_ignore_ascii_case("YES");
    column.default_sql = row
        .get(8)
        .and_then(Value::as_str)
        .map(|raw| default_expression(dialect, raw));
    column
}

/// Map a native type name back to the portable type. Unknown types read as text.
pub fn logical_type(data_type: &str, native: &str) -> LogicalType {
    match data_type {
        "character varying" | "varchar" | "character" | "char" => LogicalType::String,
        "text" | "tinytext" | "mediumtext" | "longtext" => LogicalType::Text,
        "tinyint" if native == "tinyint(1)" => LogicalType::Bool,
        "integer" | "int" | "smallint" | "mediumint" | "tinyint" => LogicalType::Int,
        "bigint" => LogicalType::BigInt,
        "boolean" | "bool" => LogicalType::Bool,
        "json" | "jsonb" => LogicalType::Json,
        "numeric" | "decimal" => LogicalType::Decimal,
        t if t.starts_with("timestamp") || t == "datetime" => LogicalType::Ts,
        other => {
            tracing::debug!(data_type = other, native, "unmapped column type, reading as text");
            LogicalType::Text
        }
    }
}

/// PostgreSQL reports defaults as SQL expressions; MySQL reports literal
/// values unquoted, so text-like defaults are quoted back.
fn default_expression(dialect: Dialect, raw: &str) -> String {
    let is_expression = raw.parse::<f64>().is_ok()
        || raw.eq_ignore_ascii_case("NULL")
        || raw.to_ascii_uppercase().starts_with("CURRENT_TIMESTAMP")
        || raw.starts_with('(');
    if dialect == Dialect::Mysql && !is_expression {
        format!("'{}'", raw.replace('\'', "''"))
    } else {
        raw.to_string()
    }
}

fn add_indexes(tables: &mut BTreeMap<TableKey, TableSnapshot>, result: &ExecResult) {
    for row in &result.rows {
        let Some(table) = tables.get_mut(&key(row)) else {
            continue;
        };
        let name = cell(row, 2);
        let column = cell(row, 3).to_string();
        let unique = row.get(4).and_then(Value::as_bool).unwrap_or(false);
        match table.indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.push(column),
            None => table.indexes.push(IndexSnapshot {
                name: name.to_string(),
                columns: vec![column],
                unique,
            }),
        }
    }
}
