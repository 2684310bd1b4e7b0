// ABOUTME: Library root for revsync - revision-based bidirectional row sync
// ABOUTME: Exports the local store, central orchestrator, backends and shared types

pub mod central;
pub mod changeset;
pub mod config;
pub mod error;
pub mod local;
pub mod merge;
pub mod postgres;
pub mod query;
pub mod registry;
pub mod round;
pub mod sqlite;
pub mod utils;

pub use central::{sync, sync_with_stats, CentralStore, PgCentral, SqliteCentral, SyncStats};
pub use changeset::{ChangeSet, Row, TableChanges};
pub use error::{SyncError, SyncResult};
pub use local::{LocalStatus, LocalStore};
pub use registry::TrackedTable;
pub use round::run_round;
