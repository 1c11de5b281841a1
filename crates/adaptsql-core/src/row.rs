//! Result rows and the column list they share.

use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of one result set, with a name lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfo {
    names: Vec<String>,
    /// Duplicate names resolve to their first position.
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
///
/// Rows from one result set share their `ColumnInfo` via `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Cell of the named column; the first one if the name repeats.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Text of the named column; `None` for NULL or a missing column.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get_by_name(name).and_then(Value::as_str)
    }

    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterate over (column name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup() {
        let cols = Arc::new(ColumnInfo::new(vec!["id".to_string(), "name".to_string()]));
        let row = Row::with_columns(
            Arc::clone(&cols),
            vec![Value::Text("1".to_string()), Value::Null],
        );
        assert_eq!(row.text("id"), Some("1"));
        assert_eq!(row.get_by_name("name"), Some(&Value::Null));
        assert_eq!(row.text("name"), None);
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let cols = Arc::new(ColumnInfo::new(vec!["x".to_string(), "x".to_string()]));
        let row = Row::with_columns(
            cols,
            vec![Value::Text("a".to_string()), Value::Text("b".to_string())],
        );
        assert_eq!(row.text("x"), Some("a"));
    }

    #[test]
    fn test_row_serializes_as_object() {
        let cols = Arc::new(ColumnInfo::new(vec!["v".to_string()]));
        let row = Row::with_columns(cols, vec![Value::Text("8.0.36".to_string())]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"v":"8.0.36"}"#);
    }
}
