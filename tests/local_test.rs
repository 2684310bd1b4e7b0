// ABOUTME: Integration tests for the local collector and applier against SQLite files
// ABOUTME: Covers collection shape, idempotent apply, rollback and delete-key validation

mod common;

use common::*;
use revsync::{ChangeSet, SyncError, TableChanges};
use serde_json::{json, Value};
use tempfile::tempdir;

fn row(value: Value) -> revsync::Row {
    value.as_object().cloned().unwrap()
}

#[test]
fn collects_single_pending_change() {
    let dir = tempdir().unwrap();
    let local = local_store(dir.path(), "client.db");
    insert_note(local.connection(), "n1", "T", "C");

    let change_set = local.collect_changes().unwrap();

    assert_eq!(
        serde_json::to_value(&change_set).unwrap(),
        json!({
            "revision": 0,
            "comment": {"changes": [], "deletes": []},
            "note": {
                "changes": [{"uuid": "n1", "title": "T", "content": "C"}],
                "deletes": []
            }
        })
    );
}

#[test]
fn collection_is_read_only_and_ordered() {
    let dir = tempdir().unwrap();
    let local = local_store(dir.path(), "client.db");
    let conn = local.connection();
    insert_note(conn, "n3", "c", "c");
    insert_note(conn, "n1", "a", "a");
    insert_note(conn, "n2", "b", "b");
    insert_note(conn, "gone", "x", "x");
    conn.execute("DELETE FROM note WHERE uuid = 'gone'", []).unwrap();
    insert_comment(conn, "c1", "n1", "first");

    let first = local.collect_changes().unwrap();
    let second = local.collect_changes().unwrap();
    assert_eq!(first, second);
    assert_eq!(count(conn, "sync"), 6);

    let names: Vec<&String> = first.tables.keys().collect();
    assert_eq!(names, vec!["comment", "note"]);
    let note = first.table("note").unwrap();
    let keys: Vec<&Value> = note.changes.iter().map(|r| &r["uuid"]).collect();
    assert_eq!(keys, vec![&json!("n1"), &json!("n2"), &json!("n3")]);
    assert_eq!(note.deletes, vec![json!("gone")]);
    assert_eq!(first.table("comment").unwrap().changes.len(), 1);
}

#[test]
fn apply_merges_rows_and_resets_sync_state() {
    let dir = tempdir().unwrap();
    let mut local = local_store(dir.path(), "client.db");
    insert_note(local.connection(), "n1", "old", "C");
    insert_note(local.connection(), "n2", "doomed", "C");

    let mut reply = ChangeSet::new(42);
    reply.insert_table(
        "note",
        TableChanges {
            changes: vec![
                row(json!({"uuid": "n1", "title": "new", "content": "C"})),
                row(json!({"uuid": "n9", "title": "fresh", "content": "F"})),
            ],
            deletes: vec![json!("n2")],
        },
    );
    local.apply_changes(&reply).unwrap();

    let conn = local.connection();
    assert_eq!(note_title(conn, "n1").as_deref(), Some("new"));
    assert_eq!(note_title(conn, "n9").as_deref(), Some("fresh"));
    assert_eq!(note_title(conn, "n2"), None);
    assert_eq!(count(conn, "sync"), 0);
    assert_eq!(revision(conn), 42);

    let status = local.status().unwrap();
    assert_eq!(status.revision, 42);
    assert_eq!(status.pending_entries, 0);
    assert_eq!(status.tracked_tables, vec!["comment", "note"]);
}

#[test]
fn applying_twice_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut local = local_store(dir.path(), "client.db");
    insert_note(local.connection(), "n2", "doomed", "C");

    let mut reply = ChangeSet::new(7);
    reply.insert_table(
        "note",
        TableChanges {
            changes: vec![row(json!({"uuid": "n1", "title": "T", "content": "C"}))],
            deletes: vec![json!("n2"), json!("never-existed")],
        },
    );

    local.apply_changes(&reply).unwrap();
    let once = snapshot(local.connection());
    local.apply_changes(&reply).unwrap();

    assert_eq!(snapshot(local.connection()), once);
    assert_eq!(revision(local.connection()), 7);
    assert_eq!(count(local.connection(), "sync"), 0);
}

#[test]
fn reply_tables_missing_locally_are_skipped() {
    let dir = tempdir().unwrap();
    let mut local = local_store(dir.path(), "client.db");

    let mut reply = ChangeSet::new(5);
    reply.insert_table(
        "attachment",
        TableChanges {
            changes: vec![row(json!({"id": 1, "name": "a.png"}))],
            deletes: vec![json!(2)],
        },
    );
    reply.insert_table(
        "note",
        TableChanges {
            changes: vec![row(json!({"uuid": "n1", "title": "T", "content": "C"}))],
            deletes: vec![],
        },
    );
    local.apply_changes(&reply).unwrap();

    let conn = local.connection();
    assert_eq!(note_title(conn, "n1").as_deref(), Some("T"));
    assert_eq!(revision(conn), 5);
    let attachment_tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'attachment'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(attachment_tables, 0);
}

#[test]
fn failed_apply_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let mut local = local_store(dir.path(), "client.db");
    insert_note(local.connection(), "n1", "T", "C");
    let before = snapshot(local.connection());

    let mut reply = ChangeSet::new(9);
    reply.insert_table(
        "comment",
        TableChanges {
            changes: vec![row(json!({"uuid": "c1", "note_uuid": "n1", "title": "ok"}))],
            deletes: vec![],
        },
    );
    reply.insert_table(
        "note",
        TableChanges {
            changes: vec![row(json!({"title": "no key"}))],
            deletes: vec![],
        },
    );

    let err = local.apply_changes(&reply).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let conn = local.connection();
    assert_eq!(snapshot(conn), before);
    assert_eq!(revision(conn), 0);
    assert_eq!(count(conn, "sync"), 1);
}

#[test]
fn non_scalar_delete_key_is_rejected() {
    let dir = tempdir().unwrap();
    let mut local = local_store(dir.path(), "client.db");
    insert_note(local.connection(), "n1", "T", "C");

    for bad in [json!({"uuid": "n1"}), json!(["n1"]), json!(null), json!(true)] {
        let mut reply = ChangeSet::new(1);
        reply.insert_table(
            "note",
            TableChanges {
                changes: vec![],
                deletes: vec![bad],
            },
        );
        let err = local.apply_changes(&reply).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)), "{}", err);
    }

    assert_eq!(note_title(local.connection(), "n1").as_deref(), Some("T"));
    assert_eq!(revision(local.connection()), 0);
}

#[test]
fn missing_revision_row_is_state_error() {
    let dir = tempdir().unwrap();
    let local = local_store(dir.path(), "client.db");
    local
        .connection()
        .execute("DELETE FROM revision", [])
        .unwrap();

    let err = local.collect_changes().unwrap_err();
    assert!(matches!(err, SyncError::State(_)));
}
