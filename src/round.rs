// ABOUTME: One full sync round in-process: collect locally, sync centrally, apply locally
// ABOUTME: Used by the CLI sync command and end-to-end tests

use crate::central::{sync_with_stats, CentralStore, SyncStats};
use crate::error::SyncResult;
use crate::local::LocalStore;

/// Run collector, orchestrator and applier back to back.
///
/// The local store is only modified after the central session has committed.
/// If the local apply then fails, the local log is kept and the next round
/// resends the same changes, which the central merge absorbs.
pub async fn run_round<S>(local: &mut LocalStore, central: &mut S) -> SyncResult<SyncStats>
where
    S: CentralStore + ?Sized,
{
    let outgoing = local.collect_changes()?;
    let (changes, deletes) = outgoing.counts();
    tracing::info!(
        "Sending {} changes and {} deletes from {} (revision {})",
        changes,
        deletes,
        local.path().display(),
        outgoing.revision
    );

    let (reply, stats) = sync_with_stats(central, &outgoing).await?;

    let (changes, deletes) = reply.counts();
    tracing::info!(
        "Applying {} changes and {} deletes, new revision {}",
        changes,
        deletes,
        reply.revision
    );
    local.apply_changes(&reply)?;
    Ok(stats)
}
