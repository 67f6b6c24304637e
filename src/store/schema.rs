// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Base DDL. Older stores predate some columns; `initialize_schema` adds
/// those in place, so the CREATE statements here must stay at the oldest
/// shape that ever shipped.
const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_unix INTEGER NOT NULL,
    ts_iso TEXT NOT NULL,
    tag TEXT NOT NULL,
    origin TEXT NOT NULL,
    session INTEGER,
    args_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts_unix);
CREATE INDEX IF NOT EXISTS idx_logs_tag_ts ON logs(tag, ts_unix);
CREATE INDEX IF NOT EXISTS idx_logs_session_ts ON logs(session, ts_unix);

CREATE TABLE IF NOT EXISTS payloads (
    log_id INTEGER PRIMARY KEY,
    payload BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS apdu_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_unix INTEGER NOT NULL,
    direction TEXT NOT NULL,
    cla_ins TEXT,
    header4 TEXT,
    sw TEXT,
    apdu_len INTEGER NOT NULL,
    session INTEGER
);
CREATE INDEX IF NOT EXISTS idx_apdu_ts ON apdu_events(ts_unix);
CREATE INDEX IF NOT EXISTS idx_apdu_dir_ts ON apdu_events(direction, ts_unix);
CREATE INDEX IF NOT EXISTS idx_apdu_cla_ins_ts ON apdu_events(cla_ins, ts_unix);
CREATE INDEX IF NOT EXISTS idx_apdu_sw_ts ON apdu_events(sw, ts_unix);
";

const ADMIN_SQL: &str = "
CREATE TABLE IF NOT EXISTS admin_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    pw_salt BLOB NOT NULL,
    pw_hash BLOB NOT NULL,
    pw_iters INTEGER NOT NULL,
    created_unix INTEGER NOT NULL,
    disabled INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS admin_tokens (
    token_hash BLOB PRIMARY KEY,
    user_id INTEGER NOT NULL,
    created_unix INTEGER NOT NULL,
    expires_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_admin_tokens_user ON admin_tokens(user_id);
";

/// Opens the long-lived write connection: WAL journal, NORMAL sync, full
/// schema present and migrated.
pub fn open_rw(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open log store {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        .context("failed to configure log store pragmas")?;
    initialize_schema(&conn).context("failed to initialize log store schema")?;
    Ok(conn)
}

/// Opens a short-lived read-only connection for query paths.
pub fn open_read(path: &Path, busy: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy)?;
    conn.execute_batch("PRAGMA query_only=1; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Opens a short-lived writable connection for admin mutations. These run
/// outside the logger's long-lived connection; SQLite's busy timeout
/// arbitrates between the two writers.
pub fn open_admin_rw(path: &Path, busy: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Creates every table and index, then upgrades older layouts in place.
/// Running this against a current store is a no-op; no data is touched.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_SQL)?;
    conn.execute_batch(ADMIN_SQL)?;

    if !has_column(conn, "logs", "session")? {
        conn.execute_batch(
            "ALTER TABLE logs ADD COLUMN session INTEGER;
             CREATE INDEX IF NOT EXISTS idx_logs_session_ts ON logs(session, ts_unix);",
        )?;
    }

    if !has_column(conn, "apdu_events", "origin")? {
        conn.execute_batch(
            "ALTER TABLE apdu_events ADD COLUMN origin TEXT;
             CREATE INDEX IF NOT EXISTS idx_apdu_origin_ts ON apdu_events(origin, ts_unix);",
        )?;
    }
    if !has_column(conn, "apdu_events", "tag")? {
        conn.execute_batch(
            "ALTER TABLE apdu_events ADD COLUMN tag TEXT;
             CREATE INDEX IF NOT EXISTS idx_apdu_tag_ts ON apdu_events(tag, ts_unix);",
        )?;
    }
    if !has_column(conn, "apdu_events", "session")? {
        conn.execute_batch(
            "ALTER TABLE apdu_events ADD COLUMN session INTEGER;
             CREATE INDEX IF NOT EXISTS idx_apdu_session_ts ON apdu_events(session, ts_unix);",
        )?;
    }

    Ok(())
}

/// Minimal admin-table bootstrap so the admin API can run against an empty
/// or older DB file without a separate migration step.
pub fn ensure_admin_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(ADMIN_SQL)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
