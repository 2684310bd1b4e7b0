// ABOUTME: Row merge primitives shared by both sides: key extraction and validation
// ABOUTME: Last-writer-wins at row granularity; no column-level conflict detection

use serde_json::Value;
use std::fmt;

use crate::changeset::Row;
use crate::error::{SyncError, SyncResult};
use crate::registry::TrackedTable;
use crate::utils::validate_identifier;

/// A primary-key value: deletes carry only this, changes carry it in the row.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl KeyValue {
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Text(s) => Value::String(s.clone()),
            KeyValue::Integer(i) => Value::from(*i),
            KeyValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
        }
    }

    pub fn to_sqlite(&self) -> rusqlite::types::Value {
        match self {
            KeyValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
            KeyValue::Integer(i) => rusqlite::types::Value::Integer(*i),
            KeyValue::Real(f) => rusqlite::types::Value::Real(*f),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Text(s) => write!(f, "{}", s),
            KeyValue::Integer(i) => write!(f, "{}", i),
            KeyValue::Real(r) => write!(f, "{}", r),
        }
    }
}

impl TryFrom<&Value> for KeyValue {
    type Error = SyncError;

    /// Only strings and numbers are keys.
    fn try_from(value: &Value) -> SyncResult<Self> {
        match value {
            Value::String(s) => Ok(KeyValue::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(KeyValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(KeyValue::Real(f))
                } else {
                    Err(SyncError::validation(format!(
                        "key {} is not representable",
                        n
                    )))
                }
            }
            other => Err(SyncError::validation(format!(
                "delete key must be a string or a number, got {}",
                json_kind(other)
            ))),
        }
    }
}

/// Validate a delete key for `table`.
pub fn delete_key(table: &TrackedTable, value: &Value) -> SyncResult<KeyValue> {
    KeyValue::try_from(value).map_err(|e| match e {
        SyncError::Validation(msg) => {
            SyncError::Validation(format!("table '{}': {}", table.name, msg))
        }
        other => other,
    })
}

/// Return the row's key, failing if the key column is absent or null.
pub fn require_key<'r>(table: &TrackedTable, row: &'r Row) -> SyncResult<&'r Value> {
    match row.get(&table.key_column) {
        Some(Value::Null) | None => Err(SyncError::validation(format!(
            "row for table '{}' has no value for key column '{}'",
            table.name, table.key_column
        ))),
        Some(value) => Ok(value),
    }
}

/// Columns of a change row split for the merge statements.
///
/// `columns` is every column in row order with the key included; `updates` is
/// the same list without the key column. Column names come from the incoming
/// payload, so each one is validated as an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeColumns {
    pub columns: Vec<String>,
    pub updates: Vec<String>,
}

/// Validate a change row and extract the column lists used by both variants.
pub fn merge_columns(table: &TrackedTable, row: &Row) -> SyncResult<MergeColumns> {
    require_key(table, row)?;
    let mut columns = Vec::with_capacity(row.len());
    let mut updates = Vec::with_capacity(row.len().saturating_sub(1));
    for column in row.keys() {
        validate_identifier(column).map_err(|e| {
            SyncError::validation(format!("table '{}': bad column name: {}", table.name, e))
        })?;
        columns.push(column.clone());
        if column != &table.key_column {
            updates.push(column.clone());
        }
    }
    Ok(MergeColumns { columns, updates })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
