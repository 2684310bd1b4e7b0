// ABOUTME: Tracked-table registry (sync_table rows) shared by every store
// ABOUTME: Names and key columns are validated before any SQL is generated from them

use crate::error::{SyncError, SyncResult};
use crate::utils::validate_identifier;

/// Name of the registry table.
pub const REGISTRY_TABLE: &str = "sync_table";
/// Name of the change log table.
pub const LOG_TABLE: &str = "sync";
/// Name of the single-row revision counter table.
pub const REVISION_TABLE: &str = "revision";

/// Change log action codes written by the change-capture triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Change,
    Delete,
}

impl LogAction {
    pub fn code(self) -> i64 {
        match self {
            LogAction::Change => 0,
            LogAction::Delete => 1,
        }
    }
}

/// A table participating in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTable {
    pub id: i64,
    pub name: String,
    pub key_column: String,
}

impl TrackedTable {
    /// Build a registry entry, rejecting names that are unsafe to interpolate.
    pub fn new(id: i64, name: impl Into<String>, key_column: impl Into<String>) -> SyncResult<Self> {
        let name = name.into();
        let key_column = key_column.into();
        validate_identifier(&name).map_err(|e| {
            SyncError::state(format!("tracked table {} has an invalid name: {}", id, e))
        })?;
        validate_identifier(&key_column).map_err(|e| {
            SyncError::state(format!(
                "tracked table '{}' has an invalid key column: {}",
                name, e
            ))
        })?;
        if [REGISTRY_TABLE, LOG_TABLE, REVISION_TABLE].contains(&name.as_str()) {
            return Err(SyncError::state(format!(
                "'{}' is a sync metadata table and cannot be tracked",
                name
            )));
        }
        Ok(Self {
            id,
            name,
            key_column,
        })
    }
}

/// Sort registry rows by name and reject duplicate names.
///
/// Stores already return rows `ORDER BY name`; sorting again keeps the
/// ordering contract independent of collation quirks.
pub fn normalize(mut tables: Vec<TrackedTable>) -> SyncResult<Vec<TrackedTable>> {
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    for pair in tables.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(SyncError::state(format!(
                "table '{}' is registered more than once",
                pair[0].name
            )));
        }
    }
    Ok(tables)
}

/// Comma-separated table names, for log lines.
pub fn table_names(tables: &[TrackedTable]) -> String {
    tables
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_names() {
        assert!(TrackedTable::new(1, "note", "uuid").is_ok());
        let err = TrackedTable::new(1, "note; DROP TABLE sync", "uuid").unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
        assert!(TrackedTable::new(1, "note", "uu id").is_err());
    }

    #[test]
    fn metadata_tables_cannot_be_tracked() {
        for name in ["sync_table", "sync", "revision"] {
            let err = TrackedTable::new(1, name, "id").unwrap_err();
            assert!(matches!(err, SyncError::State(_)));
        }
    }

    #[test]
    fn normalize_sorts_by_name() {
        let tables = vec![
            TrackedTable::new(1, "note", "uuid").unwrap(),
            TrackedTable::new(2, "comment", "uuid").unwrap(),
        ];
        let sorted = normalize(tables).unwrap();
        assert_eq!(table_names(&sorted), "comment, note");
    }

    #[test]
    fn normalize_rejects_duplicates() {
        let tables = vec![
            TrackedTable::new(1, "note", "uuid").unwrap(),
            TrackedTable::new(2, "note", "id").unwrap(),
        ];
        assert!(normalize(tables).is_err());
    }

    #[test]
    fn action_codes_match_capture_contract() {
        assert_eq!(LogAction::Change.code(), 0);
        assert_eq!(LogAction::Delete.code(), 1);
    }
}
