// ABOUTME: Schema-driven SQL generation keyed off the tracked-table registry
// ABOUTME: One dialect per backend: SQLite (?N params) and PostgreSQL ($N params, JSONB rows)

use crate::merge::MergeColumns;
use crate::registry::{LogAction, TrackedTable, LOG_TABLE, REGISTRY_TABLE, REVISION_TABLE};
use crate::utils::quote_ident;

/// SQL flavour of the store a statement is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Which part of the change log a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogWindow {
    /// Every entry (local stores hold only unsynced mutations).
    /// Params: `tid`. Latest entry per key by append order.
    All,
    /// `since < rev <= upto` (central stores).
    /// Params: `tid, since, upto`. Latest entry per key by revision.
    ///
    /// The latest-entry check looks up the log once per candidate entry, so
    /// central stores should index `sync (tid, keyval, rev)`.
    Revisions,
}

/// Registry lookup, ordered by name.
pub fn select_tables(dialect: Dialect) -> String {
    match dialect {
        Dialect::Sqlite => format!("SELECT tid, name, keycol FROM {} ORDER BY name", REGISTRY_TABLE),
        Dialect::Postgres => format!(
            "SELECT tid::bigint, name::text, keycol::text FROM {} ORDER BY name",
            REGISTRY_TABLE
        ),
    }
}

/// Current revision counter value.
pub fn select_revision(dialect: Dialect) -> String {
    match dialect {
        Dialect::Sqlite => format!("SELECT rev FROM {}", REVISION_TABLE),
        Dialect::Postgres => format!("SELECT rev::bigint FROM {}", REVISION_TABLE),
    }
}

/// Builds the per-table statements for one tracked table.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    table: &'a TrackedTable,
    dialect: Dialect,
    blob_columns: &'a [String],
}

impl<'a> QueryBuilder<'a> {
    pub fn new(table: &'a TrackedTable, dialect: Dialect) -> Self {
        Self {
            table,
            dialect,
            blob_columns: &[],
        }
    }

    /// Binary columns to re-encode as blob envelopes in PostgreSQL row projections.
    pub fn with_blob_columns(mut self, columns: &'a [String]) -> Self {
        self.blob_columns = columns;
        self
    }

    fn param(&self, n: usize) -> String {
        match self.dialect {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}::bigint", n),
        }
    }

    fn table_ident(&self) -> String {
        quote_ident(&self.table.name)
    }

    fn key_ident(&self) -> String {
        quote_ident(&self.table.key_column)
    }

    /// `WHERE` body selecting the latest log entry per key for `action`.
    fn latest_entries(&self, action: LogAction, window: LogWindow) -> String {
        let tid = self.param(1);
        let action = action.code();
        match window {
            LogWindow::All => format!(
                "s.tid = {tid} AND s.action = {action} \
                 AND NOT EXISTS (SELECT 1 FROM {log} AS later \
                 WHERE later.tid = s.tid AND later.keyval = s.keyval AND later.rowid > s.rowid)",
                log = LOG_TABLE
            ),
            LogWindow::Revisions => {
                let since = self.param(2);
                let upto = self.param(3);
                format!(
                    "s.tid = {tid} AND s.action = {action} \
                     AND s.rev > {since} AND s.rev <= {upto} \
                     AND NOT EXISTS (SELECT 1 FROM {log} AS later \
                     WHERE later.tid = s.tid AND later.keyval = s.keyval \
                     AND later.rev > s.rev AND later.rev <= {upto})",
                    log = LOG_TABLE
                )
            }
        }
    }

    /// Keys whose latest entry in the window is a delete, ordered by key.
    ///
    /// PostgreSQL logs keys as text; they are cast back through the key
    /// column's own type so ordering is numeric for numeric keys, and returned
    /// as one JSONB column.
    pub fn select_deletes(&self, window: LogWindow) -> String {
        let filter = self.latest_entries(LogAction::Delete, window);
        match self.dialect {
            Dialect::Sqlite => format!(
                "SELECT s.keyval FROM {log} AS s WHERE {filter} ORDER BY s.keyval",
                log = LOG_TABLE
            ),
            Dialect::Postgres => format!(
                "SELECT to_jsonb(d.key) FROM (SELECT (jsonb_populate_record(NULL::{table}, \
                 jsonb_build_object('{keycol}', s.keyval))).{key} AS key \
                 FROM {log} AS s WHERE {filter}) AS d ORDER BY d.key",
                table = self.table_ident(),
                keycol = self.table.key_column,
                key = self.key_ident(),
                log = LOG_TABLE
            ),
        }
    }

    /// PostgreSQL row projection: `to_jsonb(t)` with binary columns replaced
    /// by blob envelopes (`NULL` stays `null`).
    fn jsonb_projection(&self) -> String {
        let mut projection = "to_jsonb(t)".to_string();
        for column in self.blob_columns {
            let ident = quote_ident(column);
            projection.push_str(&format!(
                " || jsonb_build_object('{column}', CASE WHEN t.{ident} IS NULL THEN NULL \
                 ELSE jsonb_build_object('_type', 'blob', 'data', \
                 translate(encode(t.{ident}, 'base64'), E'\\n', '')) END)"
            ));
        }
        projection
    }

    /// Full rows whose latest entry in the window is a change, ordered by key.
    ///
    /// SQLite returns the table's columns; PostgreSQL returns one JSONB column.
    pub fn select_changes(&self, window: LogWindow) -> String {
        let table = self.table_ident();
        let key = self.key_ident();
        let (projection, join_key) = match self.dialect {
            Dialect::Sqlite => ("t.*".to_string(), format!("t.{}", key)),
            Dialect::Postgres => (self.jsonb_projection(), format!("t.{}::text", key)),
        };
        format!(
            "SELECT {projection} FROM {table} AS t \
             JOIN {log} AS s ON ({join_key} = s.keyval) \
             WHERE {filter} ORDER BY t.{key}",
            log = LOG_TABLE,
            filter = self.latest_entries(LogAction::Change, window)
        )
    }

    /// Local upsert, first half: `INSERT OR IGNORE` with one `?N` per column.
    pub fn insert_or_ignore(&self, columns: &[String]) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            self.table_ident(),
            quoted.join(", "),
            placeholders.join(", ")
        )
    }

    /// Local upsert, second half: update every non-key column by key.
    ///
    /// Params: the update values in order, then the key. `None` when the row
    /// carries only the key column.
    pub fn update_by_key(&self, updates: &[String]) -> Option<String> {
        if updates.is_empty() {
            return None;
        }
        let sets: Vec<String> = updates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
            .collect();
        Some(format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            self.table_ident(),
            sets.join(", "),
            self.key_ident(),
            updates.len() + 1
        ))
    }

    /// Central upsert: a single insert that overwrites non-key columns on key collision.
    ///
    /// SQLite binds one `?N` per column; PostgreSQL binds the whole row as `$1`
    /// JSONB and lets `jsonb_populate_record` type the columns.
    pub fn upsert(&self, merge: &MergeColumns) -> String {
        let quoted: Vec<String> = merge.columns.iter().map(|c| quote_ident(c)).collect();
        let source = match self.dialect {
            Dialect::Sqlite => {
                let placeholders: Vec<String> =
                    (1..=merge.columns.len()).map(|i| format!("?{}", i)).collect();
                format!("VALUES ({})", placeholders.join(", "))
            }
            Dialect::Postgres => format!(
                "SELECT {} FROM jsonb_populate_record(NULL::{}, $1::jsonb)",
                quoted.join(", "),
                self.table_ident()
            ),
        };

        let update_clause = if merge.updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let sets: Vec<String> = merge
                .updates
                .iter()
                .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                .collect();
            format!("DO UPDATE SET {}", sets.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) {} ON CONFLICT ({}) {}",
            self.table_ident(),
            quoted.join(", "),
            source,
            self.key_ident(),
            update_clause
        )
    }

    /// Delete one row by key.
    ///
    /// PostgreSQL receives the key wrapped as `{"<keycol>": key}` JSONB so the
    /// comparison happens in the key column's own type.
    pub fn delete_by_key(&self) -> String {
        match self.dialect {
            Dialect::Sqlite => format!(
                "DELETE FROM {} WHERE {} = ?1",
                self.table_ident(),
                self.key_ident()
            ),
            Dialect::Postgres => format!(
                "DELETE FROM {table} WHERE {key} = (jsonb_populate_record(NULL::{table}, $1::jsonb)).{key}",
                table = self.table_ident(),
                key = self.key_ident()
            ),
        }
    }
}
