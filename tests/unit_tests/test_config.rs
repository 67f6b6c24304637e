// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::env;

use nfcgate_relay_rs::cfg::{cli::Cli, config::Config, enums::RedactMode};
use serial_test::serial;

const VARS: &[&str] = &[
    "NFCGATE_LOG_DIR",
    "NFCGATE_LOG_BYTES",
    "NFCGATE_LOG_DB",
    "NFCGATE_RETENTION_DB_DAYS",
    "NFCGATE_RETENTION_JSONL_DAYS",
    "NFCGATE_RETENTION_SWEEP_SECONDS",
    "NFCGATE_ADMIN_HTTP_PORT",
    "NFCGATE_ADMIN_TOKEN_TTL_SECONDS",
    "NFCGATE_LISTEN_ADDR",
];

fn clear_env() {
    for var in VARS {
        unsafe { env::remove_var(var) };
    }
}

#[test]
#[serial]
fn test_defaults() {
    clear_env();
    let cfg = Config::from_env();

    assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:5567");
    assert_eq!(cfg.log_dir.to_str(), Some("logs"));
    assert_eq!(cfg.log_bytes, RedactMode::Full);
    assert_eq!(cfg.db_path.to_str(), Some("logs/logs.sqlite3"));
    assert_eq!(cfg.retention.db_days, 0);
    assert_eq!(cfg.retention.jsonl_days, 0);
    assert_eq!(cfg.retention.sweep_seconds, 3600);
    assert_eq!(cfg.admin_http_port, 0);
    assert_eq!(cfg.admin_token_ttl_seconds, 86_400);
}

#[test]
#[serial]
fn test_db_path_follows_log_dir() {
    clear_env();
    unsafe { env::set_var("NFCGATE_LOG_DIR", "/var/lib/nfcgate") };
    let cfg = Config::from_env();
    assert_eq!(cfg.db_path.to_str(), Some("/var/lib/nfcgate/logs.sqlite3"));

    unsafe { env::set_var("NFCGATE_LOG_DB", "/tmp/other.sqlite3") };
    let cfg = Config::from_env();
    assert_eq!(cfg.db_path.to_str(), Some("/tmp/other.sqlite3"));
    clear_env();
}

#[test]
#[serial]
fn test_redact_mode_parsing_and_fallback() {
    clear_env();
    unsafe { env::set_var("NFCGATE_LOG_BYTES", "redact") };
    assert_eq!(Config::from_env().log_bytes, RedactMode::Redact);

    unsafe { env::set_var("NFCGATE_LOG_BYTES", " NONE ") };
    assert_eq!(Config::from_env().log_bytes, RedactMode::Off);

    unsafe { env::set_var("NFCGATE_LOG_BYTES", "garbage") };
    assert_eq!(Config::from_env().log_bytes, RedactMode::Full);
    clear_env();
}

#[test]
#[serial]
fn test_integer_coercions() {
    clear_env();
    unsafe {
        env::set_var("NFCGATE_RETENTION_DB_DAYS", "14");
        env::set_var("NFCGATE_RETENTION_JSONL_DAYS", "not-a-number");
        env::set_var("NFCGATE_RETENTION_SWEEP_SECONDS", "-5");
        env::set_var("NFCGATE_ADMIN_TOKEN_TTL_SECONDS", "0");
        env::set_var("NFCGATE_ADMIN_HTTP_PORT", "8080");
    }
    let cfg = Config::from_env();

    assert_eq!(cfg.retention.db_days, 14);
    assert_eq!(cfg.retention.jsonl_days, 0);
    // Non-positive sweep intervals coerce back to the default.
    assert_eq!(cfg.retention.sweep_seconds, 3600);
    assert_eq!(cfg.admin_token_ttl_seconds, 86_400);
    assert_eq!(cfg.admin_http_port, 8080);
    clear_env();
}

#[test]
fn test_tls_flag_requires_both_files() {
    let cli = Cli { tls: true, ..Default::default() };
    assert!(cli.tls_acceptor().is_err());

    let cli = Cli {
        tls: true,
        tls_cert: Some("relay.crt".into()),
        ..Default::default()
    };
    assert!(cli.tls_acceptor().is_err());

    let cli = Cli::default();
    assert!(cli.tls_acceptor().expect("tls off").is_none());
}

#[test]
#[serial]
fn test_bad_port_disables_admin_api() {
    clear_env();
    unsafe { env::set_var("NFCGATE_ADMIN_HTTP_PORT", "99999") };
    assert_eq!(Config::from_env().admin_http_port, 0);

    unsafe { env::set_var("NFCGATE_ADMIN_HTTP_PORT", "abc") };
    assert_eq!(Config::from_env().admin_http_port, 0);
    clear_env();
}
