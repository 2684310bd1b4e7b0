// ABOUTME: Embedded SQLite central store for single-host deployments and tests
// ABOUTME: A session is one BEGIN IMMEDIATE transaction holding the database write lock

use std::path::Path;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;

use crate::central::{CentralStore, RevisionWindow};
use crate::changeset::Row;
use crate::error::{StorageResultExt, SyncResult};
use crate::registry::TrackedTable;
use crate::sqlite::reader::{self, Window};
use crate::sqlite::{open_sqlite, writer};

/// Central store in a SQLite file.
///
/// SQLite locks the whole database, so `BEGIN IMMEDIATE` covers the registry,
/// the change log and every tracked table at once. Readers keep working in
/// WAL mode while a session holds the write lock.
pub struct SqliteCentral {
    conn: Connection,
    in_session: bool,
}

impl SqliteCentral {
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        Ok(Self::from_connection(open_sqlite(path.as_ref())?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_session: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

impl From<RevisionWindow> for Window {
    fn from(window: RevisionWindow) -> Self {
        Window::Revisions {
            since: window.since,
            upto: window.upto,
        }
    }
}

#[async_trait]
impl CentralStore for SqliteCentral {
    async fn load_tables(&mut self) -> SyncResult<Vec<TrackedTable>> {
        reader::load_tables(&self.conn)
    }

    async fn lock(&mut self, _tables: &[TrackedTable]) -> SyncResult<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .lock_context(|| "failed to acquire database write lock".to_string())?;
        self.in_session = true;
        Ok(())
    }

    async fn unlock(&mut self, commit: bool) -> SyncResult<()> {
        if !self.in_session {
            return Ok(());
        }
        self.in_session = false;
        if self.conn.is_autocommit() {
            return Ok(());
        }
        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        self.conn
            .execute_batch(statement)
            .lock_context(|| format!("failed to {} sync session", statement))
    }

    async fn current_revision(&mut self) -> SyncResult<i64> {
        reader::current_revision(&self.conn)
    }

    async fn upsert_row(&mut self, table: &TrackedTable, row: &Row) -> SyncResult<()> {
        writer::upsert_row(&self.conn, table, row)
    }

    async fn delete_row(&mut self, table: &TrackedTable, key: &Value) -> SyncResult<()> {
        writer::delete_row(&self.conn, table, key)
    }

    async fn find_deletes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Value>> {
        reader::find_deletes(&self.conn, table, window.into())
    }

    async fn find_changes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Row>> {
        reader::find_changes(&self.conn, table, window.into())
    }
}
