// ABOUTME: ChangeSet wire shape exchanged between a local store and the central store
// ABOUTME: Flat JSON object: revision plus one {changes, deletes} entry per table

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A full row as exchanged on the wire: column name → value.
pub type Row = serde_json::Map<String, Value>;

/// Pending changes and deletes for one tracked table.
///
/// Delete keys are kept as raw JSON values; they are validated when applied so
/// that a malformed key is reported as a validation error rather than a decode
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    #[serde(default)]
    pub changes: Vec<Row>,
    #[serde(default)]
    pub deletes: Vec<Value>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }
}

/// The unit exchanged in one sync round.
///
/// `revision` is the producer's revision at capture time: the last central
/// revision a local store converged with, or the central revision after
/// ingestion for a reply. Tables are kept in a `BTreeMap` so they always
/// serialize sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub revision: i64,
    #[serde(flatten)]
    pub tables: BTreeMap<String, TableChanges>,
}

impl ChangeSet {
    pub fn new(revision: i64) -> Self {
        Self {
            revision,
            tables: BTreeMap::new(),
        }
    }

    /// Changes for `table`, if the producer included it.
    pub fn table(&self, table: &str) -> Option<&TableChanges> {
        self.tables.get(table)
    }

    pub fn insert_table(&mut self, table: impl Into<String>, changes: TableChanges) {
        self.tables.insert(table.into(), changes);
    }

    /// True when no table carries a change or a delete.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    /// Total (changes, deletes) across every table.
    pub fn counts(&self) -> (usize, usize) {
        self.tables.values().fold((0, 0), |(c, d), t| {
            (c + t.changes.len(), d + t.deletes.len())
        })
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
