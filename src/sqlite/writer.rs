// ABOUTME: Row merge statements for SQLite stores
// ABOUTME: Local variant (INSERT OR IGNORE + UPDATE), native upsert variant, delete by key

use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use crate::changeset::Row;
use crate::error::{StorageResultExt, SyncResult};
use crate::merge::{delete_key, merge_columns};
use crate::query::{Dialect, QueryBuilder};
use crate::registry::TrackedTable;
use crate::sqlite::converter::json_to_sqlite_value;

fn bind_values(row: &Row, columns: &[String]) -> SyncResult<Vec<SqliteValue>> {
    columns
        .iter()
        .map(|c| json_to_sqlite_value(&row[c.as_str()]))
        .collect()
}

/// Make the stored row equal `row` using two statements.
///
/// `INSERT OR IGNORE` creates the row when absent, then every non-key column
/// is overwritten by key. Net effect is an upsert without relying on native
/// upsert support.
pub fn upsert_row_two_step(conn: &Connection, table: &TrackedTable, row: &Row) -> SyncResult<()> {
    let merge = merge_columns(table, row)?;
    let qb = QueryBuilder::new(table, Dialect::Sqlite);

    let insert = qb.insert_or_ignore(&merge.columns);
    let params = bind_values(row, &merge.columns)?;
    conn.execute(&insert, params_from_iter(params))
        .storage_context(|| format!("failed to insert row into '{}'", table.name))?;

    if let Some(update) = qb.update_by_key(&merge.updates) {
        let mut params = bind_values(row, &merge.updates)?;
        params.push(json_to_sqlite_value(&row[table.key_column.as_str()])?);
        conn.execute(&update, params_from_iter(params))
            .storage_context(|| format!("failed to update row in '{}'", table.name))?;
    }
    Ok(())
}

/// Make the stored row equal `row` with one `INSERT ... ON CONFLICT DO UPDATE`.
pub fn upsert_row(conn: &Connection, table: &TrackedTable, row: &Row) -> SyncResult<()> {
    let merge = merge_columns(table, row)?;
    let sql = QueryBuilder::new(table, Dialect::Sqlite).upsert(&merge);
    let params = bind_values(row, &merge.columns)?;
    conn.execute(&sql, params_from_iter(params))
        .storage_context(|| format!("failed to upsert row into '{}'", table.name))?;
    Ok(())
}

/// Delete the row with key `key`. The key must be a string or a number.
pub fn delete_row(conn: &Connection, table: &TrackedTable, key: &Value) -> SyncResult<()> {
    let key = delete_key(table, key)?;
    let sql = QueryBuilder::new(table, Dialect::Sqlite).delete_by_key();
    conn.execute(&sql, [key.to_sqlite()])
        .storage_context(|| format!("failed to delete '{}' from '{}'", key, table.name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    fn store() -> (Connection, TrackedTable) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE note (uuid TEXT PRIMARY KEY, title TEXT, content TEXT);")
            .unwrap();
        (conn, TrackedTable::new(1, "note", "uuid").unwrap())
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn title(conn: &Connection, uuid: &str) -> Option<String> {
        conn.query_row("SELECT title FROM note WHERE uuid = ?1", [uuid], |r| r.get(0))
            .ok()
    }

    #[test]
    fn two_step_upsert_inserts_then_overwrites() {
        let (conn, note) = store();
        upsert_row_two_step(&conn, &note, &row(json!({"uuid": "n1", "title": "T", "content": "C"})))
            .unwrap();
        assert_eq!(title(&conn, "n1").as_deref(), Some("T"));

        upsert_row_two_step(&conn, &note, &row(json!({"uuid": "n1", "title": "T2", "content": "C"})))
            .unwrap();
        assert_eq!(title(&conn, "n1").as_deref(), Some("T2"));
    }

    #[test]
    fn native_upsert_overwrites_non_key_columns() {
        let (conn, note) = store();
        upsert_row(&conn, &note, &row(json!({"uuid": "n1", "title": "T", "content": "C"}))).unwrap();
        upsert_row(&conn, &note, &row(json!({"uuid": "n1", "title": "New", "content": "C"})))
            .unwrap();
        assert_eq!(title(&conn, "n1").as_deref(), Some("New"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM note", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_without_key_is_rejected_before_writing() {
        let (conn, note) = store();
        let err = upsert_row_two_step(&conn, &note, &row(json!({"title": "T"}))).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM note", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn delete_rejects_non_scalar_key_and_keeps_row() {
        let (conn, note) = store();
        upsert_row(&conn, &note, &row(json!({"uuid": "n1", "title": "T"}))).unwrap();
        let err = delete_row(&conn, &note, &json!(["n1"])).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(title(&conn, "n1").is_some());

        delete_row(&conn, &note, &json!("n1")).unwrap();
        assert!(title(&conn, "n1").is_none());
    }
}
