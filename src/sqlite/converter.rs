// ABOUTME: SQLite <-> JSON value conversion for rows crossing the wire
// ABOUTME: Lossless for all SQLite storage classes; BLOBs travel as base64 objects

use base64::Engine;
use rusqlite::types::Value as SqliteValue;
use serde_json::Value as JsonValue;

use crate::changeset::Row;
use crate::error::{SyncError, SyncResult};

const BLOB_TAG: &str = "blob";

/// Convert a single SQLite value to JSON
///
/// Maps SQLite types to JSON types:
/// - INTEGER → number (i64)
/// - REAL → number (f64), non-finite values as strings
/// - TEXT → string (UTF-8)
/// - BLOB → `{"_type": "blob", "data": "<base64>"}`
/// - NULL → null
///
/// # Examples
///
/// ```
/// # use revsync::sqlite::converter::sqlite_value_to_json;
/// # use rusqlite::types::Value;
/// let json = sqlite_value_to_json(&Value::Integer(42));
/// assert_eq!(json, serde_json::json!(42));
/// ```
pub fn sqlite_value_to_json(value: &SqliteValue) -> JsonValue {
    match value {
        SqliteValue::Null => JsonValue::Null,

        SqliteValue::Integer(i) => JsonValue::Number((*i).into()),

        SqliteValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            // JSON can't represent NaN or Infinity
            .unwrap_or_else(|| JsonValue::String(f.to_string())),

        SqliteValue::Text(s) => JsonValue::String(s.clone()),

        SqliteValue::Blob(b) => blob_to_json(b),
    }
}

/// Wrap raw bytes in the `{"_type": "blob", "data": "<base64>"}` envelope.
pub fn blob_to_json(bytes: &[u8]) -> JsonValue {
    serde_json::json!({
        "_type": BLOB_TAG,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes)
    })
}

/// Bytes carried by a blob envelope, or `None` when `value` is not one.
pub fn json_to_blob(value: &JsonValue) -> SyncResult<Option<Vec<u8>>> {
    let map = match value {
        JsonValue::Object(map) if is_blob_envelope(map) => map,
        _ => return Ok(None),
    };
    let data = map.get("data").and_then(JsonValue::as_str).unwrap_or("");
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map(Some)
        .map_err(|e| SyncError::validation(format!("invalid blob payload: {}", e)))
}

/// Convert a JSON value from a ChangeSet row into a bindable SQLite value.
///
/// Inverse of [`sqlite_value_to_json`]. Booleans become 0/1; arrays and
/// objects other than the blob envelope are stored as JSON text.
pub fn json_to_sqlite_value(value: &JsonValue) -> SyncResult<SqliteValue> {
    Ok(match value {
        JsonValue::Null => SqliteValue::Null,
        JsonValue::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqliteValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqliteValue::Real(f)
            } else {
                return Err(SyncError::validation(format!(
                    "number {} does not fit a SQLite column",
                    n
                )));
            }
        }
        JsonValue::String(s) => SqliteValue::Text(s.clone()),
        other => match json_to_blob(other)? {
            Some(bytes) => SqliteValue::Blob(bytes),
            None => SqliteValue::Text(other.to_string()),
        },
    })
}

fn is_blob_envelope(map: &serde_json::Map<String, JsonValue>) -> bool {
    map.len() == 2
        && map.get("_type").and_then(JsonValue::as_str) == Some(BLOB_TAG)
        && map.get("data").map(JsonValue::is_string).unwrap_or(false)
}

/// Read one result row into a wire [`Row`] keyed by column name.
pub fn sqlite_row_to_json(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut json_obj = Row::new();
    for (idx, name) in columns.iter().enumerate() {
        let value: SqliteValue = row.get(idx)?;
        json_obj.insert(name.clone(), sqlite_value_to_json(&value));
    }
    Ok(json_obj)
}
