// ABOUTME: PostgreSQL central store - sessions are a transaction holding table locks
// ABOUTME: Rows cross as JSONB so PostgreSQL does the column typing

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio_postgres::Client;

use crate::central::{CentralStore, RevisionWindow};
use crate::changeset::Row;
use crate::error::{StorageResultExt, SyncError, SyncResult};
use crate::merge::{delete_key, merge_columns};
use crate::query::{self, Dialect, LogWindow, QueryBuilder};
use crate::registry::{self, TrackedTable, LOG_TABLE, REGISTRY_TABLE};
use crate::sqlite::converter::json_to_blob;
use crate::utils::{quote_ident, validate_identifier};

/// `bytea` columns of one table, in column order.
const SELECT_BLOB_COLUMNS: &str = "SELECT a.attname::text FROM pg_attribute AS a \
     WHERE a.attrelid = $1::text::regclass AND a.atttypid = 'bytea'::regtype \
     AND a.attnum > 0 AND NOT a.attisdropped ORDER BY a.attnum";

/// Central store backed by a PostgreSQL connection.
///
/// A session is `BEGIN` plus `LOCK TABLE`: the registry in `SHARE` mode
/// (readable, not writable) and the change log plus every tracked table in
/// `EXCLUSIVE` mode (readable by others, writable only by this session). The
/// locks are released by `COMMIT` or `ROLLBACK`.
///
/// `bytea` columns exchange blob envelopes: incoming envelopes are rewritten
/// to `\x<hex>` input for `jsonb_populate_record`, outgoing values are
/// base64-encoded back into envelopes.
pub struct PgCentral<'a> {
    client: &'a Client,
    in_session: bool,
    blob_columns: HashMap<i64, Vec<String>>,
}

impl<'a> PgCentral<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            in_session: false,
            blob_columns: HashMap::new(),
        }
    }

    pub fn client(&self) -> &Client {
        self.client
    }

    /// `bytea` columns of `table`, looked up once per session.
    async fn blob_columns(&mut self, table: &TrackedTable) -> SyncResult<Vec<String>> {
        if let Some(columns) = self.blob_columns.get(&table.id) {
            return Ok(columns.clone());
        }
        let rows = self
            .client
            .query(SELECT_BLOB_COLUMNS, &[&quote_ident(&table.name)])
            .await
            .storage_context(|| format!("failed to query binary columns of '{}'", table.name))?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let column: String = row
                .try_get(0)
                .storage_context(|| format!("failed to read column name of '{}'", table.name))?;
            validate_identifier(&column)?;
            columns.push(column);
        }
        self.blob_columns.insert(table.id, columns.clone());
        Ok(columns)
    }
}

/// PostgreSQL `bytea` hex input for `bytes`.
fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Rewrite blob envelopes in `blob_columns` to `bytea` hex input.
fn encode_blob_columns(row: &Row, blob_columns: &[String]) -> SyncResult<Row> {
    let mut out = row.clone();
    for column in blob_columns {
        if let Some(value) = out.get_mut(column) {
            if let Some(bytes) = json_to_blob(value)? {
                *value = Value::String(bytea_hex(&bytes));
            }
        }
    }
    Ok(out)
}

/// Statements taking the session locks for `tables`.
fn lock_statement(tables: &[TrackedTable]) -> String {
    let mut exclusive = vec![LOG_TABLE.to_string()];
    exclusive.extend(tables.iter().map(|t| quote_ident(&t.name)));
    format!(
        "LOCK TABLE {} IN SHARE MODE; LOCK TABLE {} IN EXCLUSIVE MODE",
        REGISTRY_TABLE,
        exclusive.join(", ")
    )
}

#[async_trait]
impl CentralStore for PgCentral<'_> {
    async fn load_tables(&mut self) -> SyncResult<Vec<TrackedTable>> {
        self.blob_columns.clear();
        let rows = self
            .client
            .query(&query::select_tables(Dialect::Postgres), &[])
            .await
            .storage_context(|| "failed to query tracked tables".to_string())?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row
                .try_get(0)
                .storage_context(|| "failed to read sync_table.tid".to_string())?;
            let name: String = row
                .try_get(1)
                .storage_context(|| "failed to read sync_table.name".to_string())?;
            let keycol: String = row
                .try_get(2)
                .storage_context(|| "failed to read sync_table.keycol".to_string())?;
            tables.push(TrackedTable::new(id, name, keycol)?);
        }
        registry::normalize(tables)
    }

    async fn lock(&mut self, tables: &[TrackedTable]) -> SyncResult<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .lock_context(|| "failed to begin sync session".to_string())?;
        self.in_session = true;

        let sql = lock_statement(tables);
        tracing::debug!("{}", sql);
        self.client
            .batch_execute(&sql)
            .await
            .lock_context(|| format!("failed to lock {}", registry::table_names(tables)))
    }

    async fn unlock(&mut self, commit: bool) -> SyncResult<()> {
        if !self.in_session {
            return Ok(());
        }
        self.in_session = false;
        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        self.client
            .batch_execute(statement)
            .await
            .lock_context(|| format!("failed to {} sync session", statement))
    }

    async fn current_revision(&mut self) -> SyncResult<i64> {
        let row = self
            .client
            .query_opt(&query::select_revision(Dialect::Postgres), &[])
            .await
            .storage_context(|| "failed to read revision".to_string())?
            .ok_or_else(|| SyncError::state("revision table has no row"))?;
        row.try_get(0)
            .storage_context(|| "failed to read revision.rev".to_string())
    }

    async fn upsert_row(&mut self, table: &TrackedTable, row: &Row) -> SyncResult<()> {
        let merge = merge_columns(table, row)?;
        let sql = QueryBuilder::new(table, Dialect::Postgres).upsert(&merge);
        let blob_columns = self.blob_columns(table).await?;
        let payload = Value::Object(encode_blob_columns(row, &blob_columns)?);
        self.client
            .execute(&sql, &[&payload])
            .await
            .storage_context(|| format!("failed to upsert row into '{}'", table.name))?;
        Ok(())
    }

    async fn delete_row(&mut self, table: &TrackedTable, key: &Value) -> SyncResult<()> {
        let key = delete_key(table, key)?;
        let mut wrapped = Row::new();
        wrapped.insert(table.key_column.clone(), key.to_json());
        let payload = Value::Object(wrapped);
        let sql = QueryBuilder::new(table, Dialect::Postgres).delete_by_key();
        self.client
            .execute(&sql, &[&payload])
            .await
            .storage_context(|| format!("failed to delete '{}' from '{}'", key, table.name))?;
        Ok(())
    }

    async fn find_deletes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Value>> {
        let sql = QueryBuilder::new(table, Dialect::Postgres).select_deletes(LogWindow::Revisions);
        let rows = self
            .client
            .query(&sql, &[&table.id, &window.since, &window.upto])
            .await
            .storage_context(|| format!("failed to query deletes for '{}'", table.name))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, Value>(0)
                    .storage_context(|| format!("failed to read delete key for '{}'", table.name))
            })
            .collect()
    }

    async fn find_changes(
        &mut self,
        table: &TrackedTable,
        window: RevisionWindow,
    ) -> SyncResult<Vec<Row>> {
        let blob_columns = self.blob_columns(table).await?;
        let sql = QueryBuilder::new(table, Dialect::Postgres)
            .with_blob_columns(&blob_columns)
            .select_changes(LogWindow::Revisions);
        let rows = self
            .client
            .query(&sql, &[&table.id, &window.since, &window.upto])
            .await
            .storage_context(|| format!("failed to query changes for '{}'", table.name))?;
        rows.iter()
            .map(|row| {
                let value: Value = row
                    .try_get(0)
                    .storage_context(|| format!("failed to read row of '{}'", table.name))?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(SyncError::state(format!(
                        "to_jsonb returned a non-object for '{}': {}",
                        table.name, other
                    ))),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_envelopes_become_bytea_hex() {
        let row = json!({
            "id": 1,
            "body": {"_type": "blob", "data": "SGk="},
            "note": {"_type": "blob", "data": "AA=="}
        })
        .as_object()
        .cloned()
        .unwrap();
        let encoded = encode_blob_columns(&row, &["body".to_string()]).unwrap();
        assert_eq!(encoded["body"], json!("\\x4869"));
        assert_eq!(encoded["id"], json!(1));
        // Only bytea columns are rewritten.
        assert_eq!(encoded["note"], row["note"]);
    }

    #[test]
    fn null_and_plain_blob_column_values_pass_through() {
        let row = json!({"id": 1, "body": null}).as_object().cloned().unwrap();
        let encoded = encode_blob_columns(&row, &["body".to_string(), "extra".to_string()]).unwrap();
        assert_eq!(encoded, row);
        assert_eq!(bytea_hex(&[]), "\\x");
        assert_eq!(bytea_hex(&[0x00, 0xff, 0x0a]), "\\x00ff0a");
    }

    #[test]
    fn invalid_blob_payload_is_rejected() {
        let row = json!({"id": 1, "body": {"_type": "blob", "data": "%%%"}})
            .as_object()
            .cloned()
            .unwrap();
        let err = encode_blob_columns(&row, &["body".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn lock_statement_covers_registry_log_and_tables() {
        let tables = vec![
            TrackedTable::new(2, "comment", "uuid").unwrap(),
            TrackedTable::new(1, "note", "uuid").unwrap(),
        ];
        assert_eq!(
            lock_statement(&tables),
            "LOCK TABLE sync_table IN SHARE MODE; \
             LOCK TABLE sync, \"comment\", \"note\" IN EXCLUSIVE MODE"
        );
    }
}
