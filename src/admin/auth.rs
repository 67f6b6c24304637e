// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::http::HeaderMap;
use base64::Engine;
use chrono::Utc;
use rand::RngExt;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::store::admin as admin_store;

/// PBKDF2-HMAC-SHA-256 work factor for stored passwords.
pub const PBKDF2_ITERATIONS: u32 = 210_000;
/// Random salt length in bytes.
pub const SALT_LEN: usize = 16;
/// Issued tokens never live shorter than this.
pub const MIN_TOKEN_TTL_SECONDS: i64 = 60;

/// Freshly derived password material ready for storage.
#[derive(Debug, Clone)]
pub struct PasswordRecord {
    pub salt: [u8; SALT_LEN],
    pub hash: [u8; 32],
    pub iterations: u32,
}

/// Hashes a password under a new random salt.
pub fn hash_password(password: &str) -> PasswordRecord {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt);
    let hash = derive_hash(password, &salt, PBKDF2_ITERATIONS);
    PasswordRecord { salt, hash, iterations: PBKDF2_ITERATIONS }
}

pub fn derive_hash(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

/// Constant-time verification against the stored salt/hash/iterations.
pub fn verify_password(password: &str, salt: &[u8], expected: &[u8], iterations: u32) -> bool {
    let derived = derive_hash(password, salt, iterations);
    derived.as_slice().ct_eq(expected).into()
}

/// 32 random bytes, URL-safe base64. The token itself is never persisted.
pub fn generate_token() -> String {
    let mut raw = [0u8; 32];
    rand::rng().fill(&mut raw);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

/// The stored form of a token.
pub fn token_hash(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// A newly issued bearer credential.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_unix: i64,
}

/// Issues a token for `user_id`, opportunistically deleting expired rows.
pub fn issue_token(
    conn: &Connection,
    user_id: i64,
    ttl_seconds: i64,
) -> rusqlite::Result<IssuedToken> {
    let ttl = ttl_seconds.max(MIN_TOKEN_TTL_SECONDS);
    let now = Utc::now().timestamp();
    let token = generate_token();
    let hash = token_hash(&token);

    if let Err(e) = admin_store::delete_expired_tokens(conn, now) {
        tracing::debug!("expired token cleanup failed: {e}");
    }
    admin_store::insert_token(conn, &hash, user_id, now, now + ttl)?;

    Ok(IssuedToken { token, expires_unix: now + ttl })
}

/// Extracts the bearer token from the request headers.
///
/// `X-NFCGate-Token` wins so that a reverse proxy's `Authorization:
/// Basic …` cannot shadow panel auth; a `Bearer ` prefix is tolerated in
/// either header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-nfcgate-token").and_then(|v| v.to_str().ok()) {
        let token = strip_bearer_prefix(value.trim()).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let rest = value
        .split_once(char::is_whitespace)
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, rest)| rest.trim())?;
    (!rest.is_empty()).then(|| rest.to_string())
}

fn strip_bearer_prefix(value: &str) -> &str {
    match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest,
        _ => value,
    }
}
