// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, net::SocketAddr, path::PathBuf};

use crate::{cfg::enums::RedactMode, retention::RetentionSettings};

/// Address the relay listens on unless overridden.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5567";

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400;
const DEFAULT_SWEEP_SECONDS: i64 = 3_600;

/// Runtime configuration assembled from `NFCGATE_*` environment variables.
///
/// Every knob has a working default so a bare `nfcgate-relay-rs` invocation
/// relays on `0.0.0.0:5567` and logs under `./logs`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay listen address.
    pub listen_addr: SocketAddr,
    /// Base directory for the monthly JSONL tree and the default DB file.
    pub log_dir: PathBuf,
    /// Payload redaction mode for persisted events.
    pub log_bytes: RedactMode,
    /// SQLite log store path.
    pub db_path: PathBuf,
    /// Retention sweeper settings (0 = keep forever).
    pub retention: RetentionSettings,
    /// Admin HTTP port; 0 disables the admin API.
    pub admin_http_port: u16,
    /// Lifetime of issued admin tokens.
    pub admin_token_ttl_seconds: i64,
}

impl Config {
    /// Reads the environment, applying the documented defaults and
    /// coercions. Malformed values fall back to their defaults rather than
    /// failing startup.
    pub fn from_env() -> Self {
        let listen_addr = env::var("NFCGATE_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                DEFAULT_LISTEN_ADDR
                    .parse()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5567)))
            });

        let log_dir =
            PathBuf::from(env::var("NFCGATE_LOG_DIR").unwrap_or_else(|_| "logs".into()));

        let log_bytes = env::var("NFCGATE_LOG_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(RedactMode::Full);

        let db_path = env::var("NFCGATE_LOG_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| log_dir.join("logs.sqlite3"));

        let mut sweep_seconds =
            read_int_env("NFCGATE_RETENTION_SWEEP_SECONDS", DEFAULT_SWEEP_SECONDS);
        if sweep_seconds <= 0 {
            sweep_seconds = DEFAULT_SWEEP_SECONDS;
        }

        let admin_http_port = read_int_env("NFCGATE_ADMIN_HTTP_PORT", 0)
            .try_into()
            .unwrap_or(0u16);

        let mut admin_token_ttl_seconds =
            read_int_env("NFCGATE_ADMIN_TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS);
        if admin_token_ttl_seconds <= 0 {
            admin_token_ttl_seconds = DEFAULT_TOKEN_TTL_SECONDS;
        }

        Config {
            listen_addr,
            log_dir,
            log_bytes,
            db_path,
            retention: RetentionSettings {
                db_days: read_int_env("NFCGATE_RETENTION_DB_DAYS", 0),
                jsonl_days: read_int_env("NFCGATE_RETENTION_JSONL_DAYS", 0),
                sweep_seconds,
            },
            admin_http_port,
            admin_token_ttl_seconds,
        }
    }
}

fn read_int_env(name: &str, default: i64) -> i64 {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().unwrap_or(default),
        _ => default,
    }
}
