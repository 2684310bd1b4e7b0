// ABOUTME: Local (client-side) store: SQLite database with its own change log
// ABOUTME: Collects outgoing changes and applies central replies transactionally

pub mod applier;
pub mod collector;

pub use applier::apply_changes;
pub use collector::collect_changes;

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::changeset::ChangeSet;
use crate::error::SyncResult;
use crate::sqlite::{open_sqlite, reader};

/// Snapshot of a local store's sync state, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStatus {
    /// Last central revision this store converged with.
    pub revision: i64,
    /// Entries waiting in the local change log.
    pub pending_entries: i64,
    pub tracked_tables: Vec<String>,
}

/// A local store owned exclusively by this process for the duration of a round.
pub struct LocalStore {
    path: PathBuf,
    conn: Connection,
}

impl LocalStore {
    /// Open the local database. The sync schema (registry, log, revision row
    /// and capture triggers) must already exist.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let conn = open_sqlite(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Wrap an already-open connection.
    pub fn from_connection(conn: Connection) -> Self {
        let path = conn
            .path()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(":memory:"));
        Self { path, conn }
    }

    pub fn collect_changes(&self) -> SyncResult<ChangeSet> {
        collect_changes(&self.conn)
    }

    pub fn apply_changes(&mut self, change_set: &ChangeSet) -> SyncResult<()> {
        apply_changes(&mut self.conn, change_set)
    }

    pub fn status(&self) -> SyncResult<LocalStatus> {
        Ok(LocalStatus {
            revision: reader::current_revision(&self.conn)?,
            pending_entries: reader::pending_entries(&self.conn)?,
            tracked_tables: reader::load_tables(&self.conn)?
                .into_iter()
                .map(|t| t.name)
                .collect(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
