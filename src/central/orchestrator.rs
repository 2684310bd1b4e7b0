// ABOUTME: Central sync orchestrator - one locked session per client round
// ABOUTME: Lock, ingest client changes, capture revision window, compute outgoing, unlock

use std::time::Instant;

use crate::central::{CentralStore, RevisionWindow};
use crate::changeset::{ChangeSet, TableChanges};
use crate::error::SyncResult;
use crate::registry::{table_names, TrackedTable};

/// Where a session is in its lifecycle. Used to report which phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    TablesResolved,
    Locked,
    RevisionBefore,
    ClientApplied,
    RevisionAfter,
    OutgoingComputed,
}

/// Per-table counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub table: String,
    pub incoming_changes: usize,
    pub incoming_deletes: usize,
    pub outgoing_changes: usize,
    pub outgoing_deletes: usize,
}

/// Statistics from one sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Revision the client reported (its last converged central revision).
    pub client_revision: i64,
    /// Central revision before ingesting the client's changes.
    pub revision_before: i64,
    /// Central revision after ingestion; returned to the client.
    pub revision_after: i64,
    pub tables: Vec<TableStats>,
    pub duration_ms: u64,
}

/// Synchronize a client's ChangeSet with the central store.
///
/// Returns the changes the client is missing, stamped with the central
/// revision the client should remember.
pub async fn sync<S>(store: &mut S, incoming: &ChangeSet) -> SyncResult<ChangeSet>
where
    S: CentralStore + ?Sized,
{
    sync_with_stats(store, incoming)
        .await
        .map(|(change_set, _)| change_set)
}

/// Like [`sync`], also returning per-session statistics.
///
/// The session unlocks on every exit path. When a phase fails its error is
/// reported; an unlock failure is reported only when everything before it
/// succeeded, and is logged otherwise.
pub async fn sync_with_stats<S>(
    store: &mut S,
    incoming: &ChangeSet,
) -> SyncResult<(ChangeSet, SyncStats)>
where
    S: CentralStore + ?Sized,
{
    let start = Instant::now();
    let mut stats = SyncStats {
        client_revision: incoming.revision,
        ..SyncStats::default()
    };
    let mut phase = Phase::Idle;
    tracing::info!("Client revision: {}", incoming.revision);

    let result = run_session(store, incoming, &mut stats, &mut phase).await;
    let unlocked = store.unlock(result.is_ok()).await;
    stats.duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!("Syncing took: {} ms", stats.duration_ms);

    match (result, unlocked) {
        (Ok(mut outgoing), Ok(())) => {
            outgoing.revision = stats.revision_after;
            Ok((outgoing, stats))
        }
        (Ok(_), Err(unlock_err)) => {
            tracing::error!("Failed to release sync locks: {}", unlock_err);
            Err(unlock_err)
        }
        (Err(err), Ok(())) => {
            tracing::error!("Sync session failed after phase {:?}: {}", phase, err);
            Err(err)
        }
        (Err(err), Err(unlock_err)) => {
            tracing::error!("Sync session failed after phase {:?}: {}", phase, err);
            tracing::error!(
                "Failed to release sync locks after failed session: {}",
                unlock_err
            );
            Err(err)
        }
    }
}

async fn run_session<S>(
    store: &mut S,
    incoming: &ChangeSet,
    stats: &mut SyncStats,
    phase: &mut Phase,
) -> SyncResult<ChangeSet>
where
    S: CentralStore + ?Sized,
{
    let tables = store.load_tables().await?;
    *phase = Phase::TablesResolved;
    tracing::info!("Synced tables: {}", table_names(&tables));
    for name in incoming.tables.keys() {
        if !tables.iter().any(|t| &t.name == name) {
            tracing::warn!("Ignoring changes for untracked table '{}'", name);
        }
    }

    store.lock(&tables).await?;
    *phase = Phase::Locked;

    let before = store.current_revision().await?;
    *phase = Phase::RevisionBefore;
    stats.revision_before = before;
    tracing::info!("Server revision before sync: {}", before);

    apply_incoming(store, &tables, incoming, stats).await?;
    *phase = Phase::ClientApplied;

    let after = store.current_revision().await?;
    *phase = Phase::RevisionAfter;
    stats.revision_after = after;
    tracing::info!("Server revision after sync: {}", after);

    // Upper bound is `before`: everything logged by this session's own
    // ingestion sits in (before, after] and must not echo back to the client.
    let window = RevisionWindow {
        since: incoming.revision,
        upto: before,
    };
    let outgoing = find_outgoing(store, &tables, window, stats).await?;
    *phase = Phase::OutgoingComputed;

    Ok(outgoing)
}

async fn apply_incoming<S>(
    store: &mut S,
    tables: &[TrackedTable],
    incoming: &ChangeSet,
    stats: &mut SyncStats,
) -> SyncResult<()>
where
    S: CentralStore + ?Sized,
{
    let empty = TableChanges::default();
    for table in tables {
        let changes = incoming.table(&table.name).unwrap_or(&empty);
        tracing::info!(
            "Table {} has {} changes.",
            table.name,
            changes.changes.len()
        );
        for row in &changes.changes {
            store.upsert_row(table, row).await?;
        }
        tracing::info!(
            "Table {} has {} deletes.",
            table.name,
            changes.deletes.len()
        );
        for key in &changes.deletes {
            store.delete_row(table, key).await?;
        }
        stats.tables.push(TableStats {
            table: table.name.clone(),
            incoming_changes: changes.changes.len(),
            incoming_deletes: changes.deletes.len(),
            ..TableStats::default()
        });
    }
    Ok(())
}

async fn find_outgoing<S>(
    store: &mut S,
    tables: &[TrackedTable],
    window: RevisionWindow,
    stats: &mut SyncStats,
) -> SyncResult<ChangeSet>
where
    S: CentralStore + ?Sized,
{
    let mut outgoing = ChangeSet::new(window.upto);
    for table in tables {
        let deletes = store.find_deletes(table, window).await?;
        let changes = store.find_changes(table, window).await?;
        tracing::info!(
            "Table {} outgoing changes: {}",
            table.name,
            changes.len()
        );
        tracing::info!(
            "Table {} outgoing deletes: {}",
            table.name,
            deletes.len()
        );
        if let Some(entry) = stats.tables.iter_mut().find(|s| s.table == table.name) {
            entry.outgoing_changes = changes.len();
            entry.outgoing_deletes = deletes.len();
        }
        outgoing.insert_table(table.name.clone(), TableChanges { changes, deletes });
    }
    Ok(outgoing)
}
