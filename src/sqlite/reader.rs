// ABOUTME: Reads sync metadata from SQLite: registry, revision counter, change log windows
// ABOUTME: Rows come back as wire JSON objects ordered by key

use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::changeset::Row;
use crate::error::{StorageResultExt, SyncError, SyncResult};
use crate::query::{self, Dialect, LogWindow, QueryBuilder};
use crate::registry::{self, TrackedTable, LOG_TABLE};
use crate::sqlite::converter::{sqlite_row_to_json, sqlite_value_to_json};

/// Bounds for a windowed change-log read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Every entry in the log.
    All,
    /// Entries with `since < rev <= upto`.
    Revisions { since: i64, upto: i64 },
}

impl Window {
    fn log_window(self) -> LogWindow {
        match self {
            Window::All => LogWindow::All,
            Window::Revisions { .. } => LogWindow::Revisions,
        }
    }

    fn params(self, table: &TrackedTable) -> Vec<SqliteValue> {
        let mut params = vec![SqliteValue::Integer(table.id)];
        if let Window::Revisions { since, upto } = self {
            params.push(SqliteValue::Integer(since));
            params.push(SqliteValue::Integer(upto));
        }
        params
    }
}

/// Load the tracked-table registry, ordered by name.
pub fn load_tables(conn: &Connection) -> SyncResult<Vec<TrackedTable>> {
    let mut stmt = conn
        .prepare(&query::select_tables(Dialect::Sqlite))
        .storage_context(|| "failed to prepare registry query".to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .storage_context(|| "failed to query tracked tables".to_string())?
        .collect::<Result<Vec<_>, _>>()
        .storage_context(|| "failed to read tracked tables".to_string())?;

    let tables = rows
        .into_iter()
        .map(|(id, name, keycol)| TrackedTable::new(id, name, keycol))
        .collect::<SyncResult<Vec<_>>>()?;
    registry::normalize(tables)
}

/// Read the single-row revision counter.
///
/// Every store is initialized with a revision row; its absence is a
/// [`SyncError::State`].
pub fn current_revision(conn: &Connection) -> SyncResult<i64> {
    conn.query_row(&query::select_revision(Dialect::Sqlite), [], |row| {
        row.get::<_, i64>(0)
    })
    .optional()
    .storage_context(|| "failed to read revision".to_string())?
    .ok_or_else(|| SyncError::state("revision table has no row"))
}

/// Keys whose latest log entry in `window` is a delete, ordered by key.
pub fn find_deletes(conn: &Connection, table: &TrackedTable, window: Window) -> SyncResult<Vec<Value>> {
    let sql = QueryBuilder::new(table, Dialect::Sqlite).select_deletes(window.log_window());
    let mut stmt = conn
        .prepare(&sql)
        .storage_context(|| format!("failed to prepare delete query for '{}'", table.name))?;
    let keys = stmt
        .query_map(params_from_iter(window.params(table)), |row| {
            row.get::<_, SqliteValue>(0)
        })
        .storage_context(|| format!("failed to query deletes for '{}'", table.name))?
        .map(|key| key.map(|k| sqlite_value_to_json(&k)))
        .collect::<Result<Vec<_>, _>>()
        .storage_context(|| format!("failed to read deletes for '{}'", table.name))?;
    Ok(keys)
}

/// Full rows whose latest log entry in `window` is a change, ordered by key.
pub fn find_changes(conn: &Connection, table: &TrackedTable, window: Window) -> SyncResult<Vec<Row>> {
    let sql = QueryBuilder::new(table, Dialect::Sqlite).select_changes(window.log_window());
    let mut stmt = conn
        .prepare(&sql)
        .storage_context(|| format!("failed to prepare change query for '{}'", table.name))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(window.params(table)), |row| {
            sqlite_row_to_json(row, &columns)
        })
        .storage_context(|| format!("failed to query changes for '{}'", table.name))?
        .collect::<Result<Vec<_>, _>>()
        .storage_context(|| format!("failed to read changes for '{}'", table.name))?;
    Ok(rows)
}

/// Number of entries in the change log.
pub fn pending_entries(conn: &Connection) -> SyncResult<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", LOG_TABLE), [], |row| {
        row.get(0)
    })
    .storage_context(|| "failed to count change log entries".to_string())
}
