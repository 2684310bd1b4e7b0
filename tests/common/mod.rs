// ABOUTME: Shared fixtures for integration tests: sync schema, capture triggers, random edits
// ABOUTME: Capture triggers stand in for the external change-capture contract
#![allow(dead_code)]

use rand::seq::SliceRandom;
use rand::Rng;
use revsync::{LocalStore, SqliteCentral};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params, Connection};
use std::path::Path;

pub const TABLES: [&str; 2] = ["comment", "note"];

const BASE_SCHEMA: &str = "
    CREATE TABLE sync_table (tid INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, keycol TEXT NOT NULL);
    CREATE TABLE sync (tid INTEGER NOT NULL, keyval, action INTEGER NOT NULL, rev INTEGER);
    CREATE INDEX sync_tid_keyval_rev ON sync (tid, keyval, rev);
    CREATE TABLE revision (rev INTEGER NOT NULL);
    INSERT INTO revision VALUES (0);
    CREATE TABLE note (uuid TEXT PRIMARY KEY, title TEXT, content TEXT);
    CREATE TABLE comment (uuid TEXT PRIMARY KEY, note_uuid TEXT, title TEXT);
    INSERT INTO sync_table (tid, name, keycol) VALUES (1, 'note', 'uuid'), (2, 'comment', 'uuid');
";

/// Central capture: every mutation bumps the revision and logs it.
fn central_triggers(table: &str, tid: i64) -> String {
    let mut ddl = String::new();
    for (event, row, action) in [("INSERT", "NEW", 0), ("UPDATE", "NEW", 0), ("DELETE", "OLD", 1)] {
        ddl.push_str(&format!(
            "CREATE TRIGGER {table}_{name}_sync AFTER {event} ON {table} BEGIN
                 UPDATE revision SET rev = rev + 1;
                 INSERT INTO sync (tid, keyval, action, rev)
                     SELECT {tid}, {row}.uuid, {action}, rev FROM revision;
             END;",
            name = event.to_lowercase(),
        ));
    }
    ddl
}

/// Local capture: mutations are logged without a revision.
fn local_triggers(table: &str, tid: i64) -> String {
    let mut ddl = String::new();
    for (event, row, action) in [("INSERT", "NEW", 0), ("UPDATE", "NEW", 0), ("DELETE", "OLD", 1)] {
        ddl.push_str(&format!(
            "CREATE TRIGGER {table}_{name}_sync AFTER {event} ON {table} BEGIN
                 INSERT INTO sync (tid, keyval, action) VALUES ({tid}, {row}.uuid, {action});
             END;",
            name = event.to_lowercase(),
        ));
    }
    ddl
}

pub fn init_central_schema(conn: &Connection) {
    conn.execute_batch(BASE_SCHEMA).unwrap();
    conn.execute_batch(&central_triggers("note", 1)).unwrap();
    conn.execute_batch(&central_triggers("comment", 2)).unwrap();
}

pub fn init_local_schema(conn: &Connection) {
    conn.execute_batch(BASE_SCHEMA).unwrap();
    conn.execute_batch(&local_triggers("note", 1)).unwrap();
    conn.execute_batch(&local_triggers("comment", 2)).unwrap();
}

pub fn local_store(dir: &Path, name: &str) -> LocalStore {
    let store = LocalStore::open(dir.join(name)).unwrap();
    init_local_schema(store.connection());
    store
}

pub fn central_store(dir: &Path) -> SqliteCentral {
    let store = SqliteCentral::open(dir.join("central.db")).unwrap();
    init_central_schema(store.connection());
    store
}

pub fn insert_note(conn: &Connection, uuid: &str, title: &str, content: &str) {
    conn.execute(
        "INSERT INTO note (uuid, title, content) VALUES (?1, ?2, ?3)",
        params![uuid, title, content],
    )
    .unwrap();
}

pub fn insert_comment(conn: &Connection, uuid: &str, note_uuid: &str, title: &str) {
    conn.execute(
        "INSERT INTO comment (uuid, note_uuid, title) VALUES (?1, ?2, ?3)",
        params![uuid, note_uuid, title],
    )
    .unwrap();
}

pub fn note_title(conn: &Connection, uuid: &str) -> Option<String> {
    conn.query_row("SELECT title FROM note WHERE uuid = ?1", [uuid], |r| r.get(0))
        .ok()
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}

pub fn revision(conn: &Connection) -> i64 {
    conn.query_row("SELECT rev FROM revision", [], |r| r.get(0))
        .unwrap()
}

/// All rows of `table`, ordered by key.
pub fn rows(conn: &Connection, table: &str) -> Vec<Vec<SqliteValue>> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {} ORDER BY uuid", table))
        .unwrap();
    let width = stmt.column_count();
    stmt.query_map([], |row| {
        (0..width)
            .map(|i| row.get::<_, SqliteValue>(i))
            .collect::<rusqlite::Result<Vec<_>>>()
    })
    .unwrap()
    .collect::<rusqlite::Result<Vec<_>>>()
    .unwrap()
}

/// Row sets of every tracked table.
pub fn snapshot(conn: &Connection) -> Vec<Vec<Vec<SqliteValue>>> {
    TABLES.iter().map(|t| rows(conn, t)).collect()
}

fn keys(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("SELECT uuid FROM {}", table))
        .unwrap();
    stmt.query_map([], |r| r.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
}

/// Apply `count` random inserts, updates and deletes to the domain tables.
pub fn random_ops<R: Rng>(conn: &Connection, rng: &mut R, count: usize) {
    for _ in 0..count {
        let table = *TABLES.choose(rng).unwrap();
        let existing = keys(conn, table);
        let op = if existing.is_empty() { 0 } else { rng.gen_range(0..3) };
        let text = format!("text-{}", rng.gen::<u32>());
        match (op, table) {
            (0, "note") => insert_note(conn, &uuid::Uuid::new_v4().to_string(), &text, &text),
            (0, _) => insert_comment(conn, &uuid::Uuid::new_v4().to_string(), "", &text),
            (1, _) => {
                let key = existing.choose(rng).unwrap();
                conn.execute(
                    &format!("UPDATE {} SET title = ?1 WHERE uuid = ?2", table),
                    params![text, key],
                )
                .unwrap();
            }
            _ => {
                let key = existing.choose(rng).unwrap();
                conn.execute(&format!("DELETE FROM {} WHERE uuid = ?1", table), [key])
                    .unwrap();
            }
        }
    }
}
