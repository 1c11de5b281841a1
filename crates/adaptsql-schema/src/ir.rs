//! Dialect-agnostic schema IR.
//!
//! Everything here serializes to plain JSON in the shape callers persist plan
//! and snapshot files in.

use std::fs;
use std::path::Path;

use adaptsql_core::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// Columns
// ============================================================================

/// Portable column type. Mapped to a concrete SQL type by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    String,
    Text,
    Int,
    BigInt,
    Bool,
    Json,
    Decimal,
    Ts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    pub logical_type: LogicalType,
    /// `varchar` length or `decimal` precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
}

impl ColumnSpec {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            len: None,
            scale: None,
            nullable: true,
            default_sql: None,
            generated_sql: None,
        }
    }

    pub fn len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default_sql = Some(expr.into());
        self
    }

    pub fn generated(mut self, expr: impl Into<String>) -> Self {
        self.generated_sql = Some(expr.into());
        self
    }

    /// Adding this column to a populated table needs a value for every row.
    pub fn needs_backfill(&self) -> bool {
        !self.nullable && self.default_sql.is_none() && self.generated_sql.is_none()
    }
}

// ============================================================================
// Operations
// ============================================================================

/// How an index build interacts with concurrent writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBuild {
    /// Plain `CREATE INDEX`; writes block for the duration.
    #[default]
    Blocking,
    /// `CREATE INDEX CONCURRENTLY`.
    Concurrent,
    /// `ALTER TABLE ... ADD INDEX` with the learned online-alter hint.
    Online,
}

impl IndexBuild {
    #[allow(clippy::trivially_copy_pass_by_ref)]
    fn is_blocking(&self) -> bool {
        *self == IndexBuild::Blocking
    }
}

/// One schema mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Op {
    CreateTable {
        schema: String,
        name: String,
        columns: Vec<ColumnSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pk: Option<Vec<String>>,
    },
    AddColumn {
        schema: String,
        table: String,
        column: ColumnSpec,
    },
    AddIndex {
        schema: String,
        table: String,
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
        #[serde(default, skip_serializing_if = "IndexBuild::is_blocking")]
        build: IndexBuild,
    },
    DropTable {
        schema: String,
        name: String,
    },
    /// Verbatim SQL. `unsafe` marks it for audit.
    #[serde(rename = "ExecSQL")]
    ExecSql {
        sql: String,
        #[serde(default, rename = "unsafe")]
        unsafe_: bool,
    },
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::CreateTable { .. } => "CreateTable",
            Op::AddColumn { .. } => "AddColumn",
            Op::AddIndex { .. } => "AddIndex",
            Op::DropTable { .. } => "DropTable",
            Op::ExecSql { .. } => "ExecSQL",
        }
    }

    /// The table the op touches, if it names one.
    pub fn table(&self) -> Option<(&str, &str)> {
        match self {
            Op::CreateTable { schema, name, .. } | Op::DropTable { schema, name } => {
                Some((schema, name))
            }
            Op::AddColumn { schema, table, .. } | Op::AddIndex { schema, table, .. } => {
                Some((schema, table))
            }
            Op::ExecSql { .. } => None,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Op::DropTable { .. })
    }
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
}

/// Ordered ops. Order is execution order and is never rearranged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub ops: Vec<Op>,
    pub risk: Risk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Plan {
    pub fn new(ops: Vec<Op>, risk: Risk) -> Self {
        Self {
            ops,
            risk,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSnapshot>,
}

impl TableSnapshot {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: IndexSnapshot) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// An index whose column list is exactly `columns`.
    pub fn index_on(&self, columns: &[String]) -> Option<&IndexSnapshot> {
        self.indexes.iter().find(|i| i.columns == columns)
    }
}

/// Structure of one database at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub tables: Vec<TableSnapshot>,
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self {
            version: 1,
            database: None,
            tables: Vec::new(),
        }
    }
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSnapshot>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&TableSnapshot> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.name == name)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_json_shape() {
        let op = Op::ExecSql {
            sql: "VACUUM".to_string(),
            unsafe_: true,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "ExecSQL");
        assert_eq!(json["unsafe"], true);

        let op = Op::AddIndex {
            schema: "app".to_string(),
            table: "users".to_string(),
            name: "idx_users_email".to_string(),
            columns: vec!["email".to_string()],
            unique: true,
            build: IndexBuild::Blocking,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "AddIndex");
        assert!(json.get("build").is_none());
    }

    #[test]
    fn test_plan_parses_minimal_json() {
        let plan: Plan = serde_json::from_str(
            r#"{
                "ops": [
                    {"kind": "CreateTable", "schema": "app", "name": "t",
                     "columns": [{"name": "id", "logicalType": "bigint", "nullable": false}],
                     "pk": ["id"]},
                    {"kind": "ExecSQL", "sql": "SELECT 1"}
                ],
                "risk": "low"
            }"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.ops[1], Op::ExecSql { sql: "SELECT 1".to_string(), unsafe_: false });
        match &plan.ops[0] {
            Op::CreateTable { columns, pk, .. } => {
                assert_eq!(columns[0].logical_type, LogicalType::BigInt);
                assert_eq!(pk.as_deref(), Some(&["id".to_string()][..]));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_risk_orders_by_severity() {
        assert!(Risk::Low < Risk::Medium);
        assert!(Risk::Medium < Risk::High);
        assert_eq!(Risk::Low.max(Risk::High), Risk::High);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = SchemaSnapshot::new(vec![
            TableSnapshot::new("app", "users")
                .column(ColumnSpec::new("id", LogicalType::BigInt).not_null())
                .primary_key(["id"]),
        ]);
        snapshot.save(&path).unwrap();
        assert_eq!(SchemaSnapshot::load(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_column_backfill() {
        assert!(ColumnSpec::new("a", LogicalType::Int).not_null().needs_backfill());
        assert!(!ColumnSpec::new("a", LogicalType::Int).needs_backfill());
        assert!(
            !ColumnSpec::new("a", LogicalType::Int)
                .not_null()
                .default_sql("0")
                .needs_backfill()
        );
    }
}
