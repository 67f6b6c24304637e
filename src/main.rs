// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nfcgate_relay_rs::{
    admin::api::{AdminState, serve as serve_admin},
    cfg::{cli::Cli, config::Config, logger::init_logger},
    logging::EventLogger,
    nfc::{NfcDecoder, indexer::ApduIndexer, proto::EnvelopeDecoder},
    relay::{plugins::PluginChain, registry::SessionRegistry, server::RelayServer},
    retention::RetentionSweeper,
    store::schema,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logger("info")?;

    let cli = Cli::parse();
    let cfg = Config::from_env();

    // TLS misconfiguration is fatal before anything is bound.
    let tls = cli.tls_acceptor()?;

    let file_enabled = match std::fs::create_dir_all(&cfg.log_dir) {
        Ok(()) => true,
        Err(e) => {
            warn!("cannot create log dir {}: {e}; file logging disabled", cfg.log_dir.display());
            false
        },
    };

    let db = match schema::open_rw(&cfg.db_path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("log store unavailable: {e:#}; DB logging disabled");
            None
        },
    };

    let decoder: Arc<dyn NfcDecoder> = Arc::new(EnvelopeDecoder);
    let indexer = ApduIndexer::new(Some(decoder));
    let protobuf_indexing = indexer.available();

    let logger = Arc::new(EventLogger::new(
        cfg.log_bytes,
        cfg.log_dir.clone(),
        db,
        indexer,
        file_enabled,
    ));
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&logger)));

    let plugins = Arc::new(PluginChain::from_names(&cli.plugins)?);
    for name in &cli.plugins {
        info!("loaded plugin {name}");
    }

    if let Some(tls_cert) = &cli.tls_cert
        && let Some(tls_key) = &cli.tls_key
        && tls.is_some()
    {
        let line = format!(
            "TLS enabled with cert {} and key {}",
            tls_cert.display(),
            tls_key.display()
        );
        logger.log_strs("server", &[line.as_str()], "0", None);
    }

    let cancel = CancellationToken::new();

    if cfg.retention.enabled() {
        let db_days = format!("db_days={}", cfg.retention.db_days);
        let jsonl_days = format!("jsonl_days={}", cfg.retention.jsonl_days);
        let sweep = format!("sweep_seconds={}", cfg.retention.sweep_seconds);
        logger.log_strs(
            "server",
            &[
                "Retention enabled:",
                db_days.as_str(),
                jsonl_days.as_str(),
                sweep.as_str(),
            ],
            "0",
            None,
        );
        let sweeper =
            RetentionSweeper::new(Arc::clone(&logger), cfg.retention, cfg.log_dir.clone());
        tokio::spawn(sweeper.run(cancel.clone()));
    }

    if cfg.admin_http_port > 0 {
        let state = AdminState {
            db_path: cfg.db_path.clone(),
            started_unix: chrono::Utc::now().timestamp(),
            log_bytes_mode: cfg.log_bytes,
            protobuf_indexing,
            token_ttl_seconds: cfg.admin_token_ttl_seconds,
            retention: cfg.retention,
        };
        match TcpListener::bind(("0.0.0.0", cfg.admin_http_port)).await {
            Ok(listener) => {
                let bound = format!("0.0.0.0:{}", cfg.admin_http_port);
                logger.log_strs(
                    "server",
                    &["Admin HTTP listening on", bound.as_str()],
                    "0",
                    None,
                );
                tokio::spawn(async move {
                    if let Err(e) = serve_admin(listener, state).await {
                        warn!("admin HTTP server exited: {e:#}");
                    }
                });
            },
            Err(e) => {
                logger.log_strs("server", &["Admin HTTP failed to start"], "0", None);
                warn!("admin HTTP bind failed: {e}");
            },
        }
    }

    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", cfg.listen_addr))?;

    let server = RelayServer::new(logger, registry, plugins, tls);
    server.run(listener, cancel).await
}
