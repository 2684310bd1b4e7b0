// ABOUTME: Central store abstraction and the sync orchestrator that drives it
// ABOUTME: Backends: PostgreSQL (tokio-postgres) and embedded SQLite (rusqlite)

pub mod orchestrator;
pub mod postgres;
pub mod sqlite;

pub use orchestrator::{sync, sync_with_stats, SyncStats, TableStats};
pub use postgres::PgCentral;
pub use sqlite::SqliteCentral;

use async_trait::async_trait;
use serde_json::Value;

use crate::changeset::Row;
use crate::error::SyncResult;
use crate::registry::TrackedTable;

/// Revision bounds of an outgoing window: `since < rev <= upto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionWindow {
    pub since: i64,
    pub upto: i64,
}

/// Operations the orchestrator issues against the central store.
///
/// Everything between [`lock`](CentralStore::lock) and
/// [`unlock`](CentralStore::unlock) is one isolated session: no other session
/// or writer may mutate the tracked tables or the change log in between.
#[async_trait]
pub trait CentralStore: Send {
    /// Load the tracked-table registry, ordered by name.
    async fn load_tables(&mut self) -> SyncResult<Vec<TrackedTable>>;

    /// Start the session: exclusive write locks on `tables` and the change
    /// log, a read lock on the registry.
    async fn lock(&mut self, tables: &[TrackedTable]) -> SyncResult<()>;

    /// End the session. `commit` is false when any phase failed, in which case
    /// the backend discards the session's writes.
    async fn unlock(&mut self, commit: bool) -> SyncResult<()>;

    /// Current value of the revision counter.
    async fn current_revision(&mut self) -> SyncResult<i64>;

    /// Native upsert of one full row.
    async fn upsert_row(&mut self, table: &TrackedTable, row: &Row) -> SyncResult<()>;

    /// Delete one row by key; the key must be a string or a number.
    async fn delete_row(&mut self, table: &TrackedTable, key: &Value) -> SyncResult<()>;

    /// Keys whose latest log entry in `window` is a delete, ordered by key.
    async fn find_deletes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Value>>;

    /// Rows whose latest log entry in `window` is a change, ordered by key.
    async fn find_changes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Row>>;
}
