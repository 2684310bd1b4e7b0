// ABOUTME: Local change collector - builds the outgoing ChangeSet from the local log
// ABOUTME: Pure read: registry order by name, deletes then changes per table, keys ascending

use rusqlite::Connection;

use crate::changeset::{ChangeSet, TableChanges};
use crate::error::SyncResult;
use crate::sqlite::reader::{current_revision, find_changes, find_deletes, load_tables, Window};

/// Collect every unsynced local mutation.
///
/// The local log only ever holds mutations made since the last successful
/// apply, so it is read without a revision window. The returned revision is
/// the last central revision this store converged with.
///
/// Fails fast: the first storage error aborts the collection and no partial
/// ChangeSet is returned.
pub fn collect_changes(conn: &Connection) -> SyncResult<ChangeSet> {
    let revision = current_revision(conn)?;
    let tables = load_tables(conn)?;

    let mut change_set = ChangeSet::new(revision);
    for table in &tables {
        let deletes = find_deletes(conn, table, Window::All)?;
        let changes = find_changes(conn, table, Window::All)?;
        tracing::debug!(
            "Table {} has {} local changes and {} local deletes",
            table.name,
            changes.len(),
            deletes.len()
        );
        change_set.insert_table(table.name.clone(), TableChanges { changes, deletes });
    }

    let (changes, deletes) = change_set.counts();
    tracing::info!(
        "Collected {} changes and {} deletes at revision {}",
        changes,
        deletes,
        revision
    );
    Ok(change_set)
}
