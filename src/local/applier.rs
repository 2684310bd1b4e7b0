// ABOUTME: Local change applier - merges a central ChangeSet in one scoped transaction
// ABOUTME: Clears the local log and advances the local revision only on full success

use rusqlite::Connection;

use crate::changeset::{ChangeSet, TableChanges};
use crate::error::{StorageResultExt, SyncResult};
use crate::registry::{LOG_TABLE, REVISION_TABLE};
use crate::sqlite::reader::load_tables;
use crate::sqlite::writer::{delete_row, upsert_row_two_step};

/// Apply a ChangeSet received from the central store.
///
/// Tables are processed in registry order, changes before deletes. After
/// every table succeeds the local log is cleared and the local revision is set
/// to `change_set.revision`, then the transaction commits.
///
/// Any error returns early; the transaction is dropped uncommitted and SQLite
/// rolls it back, so the store is left exactly as it was.
pub fn apply_changes(conn: &mut Connection, change_set: &ChangeSet) -> SyncResult<()> {
    let tx = conn
        .transaction()
        .storage_context(|| "failed to begin apply transaction".to_string())?;

    let tables = load_tables(&tx)?;
    for name in change_set.tables.keys() {
        if !tables.iter().any(|t| &t.name == name) {
            tracing::warn!("Ignoring changes for untracked table '{}'", name);
        }
    }
    let empty = TableChanges::default();
    for table in &tables {
        let incoming = change_set.table(&table.name).unwrap_or(&empty);
        for row in &incoming.changes {
            upsert_row_two_step(&tx, table, row)?;
        }
        for key in &incoming.deletes {
            delete_row(&tx, table, key)?;
        }
        tracing::debug!(
            "Applied {} changes and {} deletes to {}",
            incoming.changes.len(),
            incoming.deletes.len(),
            table.name
        );
    }

    reset_sync(&tx, change_set.revision)?;

    tx.commit()
        .storage_context(|| "failed to commit apply transaction".to_string())?;
    tracing::info!("Local store now at revision {}", change_set.revision);
    Ok(())
}

/// Drop the local log (superseded by central state) and record `revision`.
fn reset_sync(conn: &Connection, revision: i64) -> SyncResult<()> {
    conn.execute(&format!("DELETE FROM {}", LOG_TABLE), [])
        .storage_context(|| "failed to clear local change log".to_string())?;
    let updated = conn
        .execute(&format!("UPDATE {} SET rev = ?1", REVISION_TABLE), [revision])
        .storage_context(|| "failed to update local revision".to_string())?;
    if updated == 0 {
        return Err(crate::error::SyncError::state("revision table has no row"));
    }
    Ok(())
}
