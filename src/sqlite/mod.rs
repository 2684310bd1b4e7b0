// ABOUTME: SQLite access shared by the local store and the embedded central store
// ABOUTME: Opening connections, registry/log reads and row merge statements

pub mod converter;
pub mod reader;
pub mod writer;

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{StorageResultExt, SyncResult};

/// How long a connection waits on another connection's write lock before
/// giving up with `SQLITE_BUSY`.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a SQLite database for syncing.
///
/// Enables WAL so readers are not blocked by a sync session holding the write
/// lock, and sets [`BUSY_TIMEOUT`] so competing sessions wait rather than fail
/// immediately.
///
/// # Examples
///
/// ```no_run
/// # use revsync::sqlite::open_sqlite;
/// # fn example() -> revsync::SyncResult<()> {
/// let conn = open_sqlite("client.sqlite")?;
/// # Ok(())
/// # }
/// ```
pub fn open_sqlite(path: impl AsRef<Path>) -> SyncResult<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .storage_context(|| format!("failed to open SQLite database {}", path.display()))?;
    conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get::<_, String>(0))
        .storage_context(|| format!("failed to enable WAL for {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .storage_context(|| format!("failed to set busy timeout for {}", path.display()))?;
    tracing::debug!("Opened SQLite database {}", path.display());
    Ok(conn)
}
