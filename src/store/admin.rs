// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rusqlite::{Connection, OptionalExtension, params};

/// Administrator account as exposed over the API (no secret material).
#[derive(Debug, Clone, PartialEq)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub created_unix: i64,
    pub disabled: bool,
}

/// Stored password-verification material for one user.
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: i64,
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
    pub iterations: u32,
    pub disabled: bool,
}

pub fn count_active_admins(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM admin_users WHERE disabled = 0", [], |row| {
        row.get(0)
    })
}

pub fn credential_for(conn: &Connection, username: &str) -> rusqlite::Result<Option<Credential>> {
    conn.query_row(
        "SELECT id, pw_salt, pw_hash, pw_iters, disabled FROM admin_users WHERE username = ?1",
        params![username],
        |row| {
            Ok(Credential {
                user_id: row.get(0)?,
                salt: row.get(1)?,
                hash: row.get(2)?,
                iterations: row.get(3)?,
                disabled: row.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    salt: &[u8],
    hash: &[u8],
    iterations: u32,
    now_unix: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO admin_users (username, pw_salt, pw_hash, pw_iters, created_unix, disabled) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![username, salt, hash, iterations, now_unix],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_users(conn: &Connection) -> rusqlite::Result<Vec<AdminUser>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, created_unix, disabled FROM admin_users ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], row_to_user)?;
    rows.collect()
}

pub fn get_user(conn: &Connection, id: i64) -> rusqlite::Result<Option<AdminUser>> {
    conn.query_row(
        "SELECT id, username, created_unix, disabled FROM admin_users WHERE id = ?1",
        params![id],
        row_to_user,
    )
    .optional()
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<AdminUser> {
    Ok(AdminUser {
        id: row.get(0)?,
        username: row.get(1)?,
        created_unix: row.get(2)?,
        disabled: row.get::<_, i64>(3)? != 0,
    })
}

pub fn set_password(
    conn: &Connection,
    id: i64,
    salt: &[u8],
    hash: &[u8],
    iterations: u32,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE admin_users SET pw_salt = ?1, pw_hash = ?2, pw_iters = ?3 WHERE id = ?4",
        params![salt, hash, iterations, id],
    )?;
    Ok(())
}

pub fn set_disabled(conn: &Connection, id: i64, disabled: bool) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE admin_users SET disabled = ?1 WHERE id = ?2",
        params![disabled as i64, id],
    )?;
    Ok(())
}

pub fn delete_user(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM admin_tokens WHERE user_id = ?1", params![id])?;
    conn.execute("DELETE FROM admin_users WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn revoke_tokens(conn: &Connection, user_id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM admin_tokens WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn delete_expired_tokens(conn: &Connection, now_unix: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM admin_tokens WHERE expires_unix <= ?1", params![now_unix])?;
    Ok(())
}

pub fn insert_token(
    conn: &Connection,
    token_hash: &[u8],
    user_id: i64,
    created_unix: i64,
    expires_unix: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO admin_tokens (token_hash, user_id, created_unix, expires_unix) \
         VALUES (?1, ?2, ?3, ?4)",
        params![token_hash, user_id, created_unix, expires_unix],
    )?;
    Ok(())
}

/// Resolves a token hash to its live owner: the hash must exist, be
/// unexpired, and belong to a non-disabled user.
pub fn token_user(
    conn: &Connection,
    token_hash: &[u8],
    now_unix: i64,
) -> rusqlite::Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT u.id, u.username FROM admin_tokens t \
         JOIN admin_users u ON u.id = t.user_id \
         WHERE t.token_hash = ?1 AND t.expires_unix > ?2 AND u.disabled = 0",
        params![token_hash, now_unix],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}
