// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Installs the diagnostics subscriber.
///
/// Diagnostics go to stderr; stdout is reserved for the structured event
/// log's human-readable lines. `RUST_LOG` overrides `default_level`.
pub fn init_logger(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("failed to parse log level from env or default")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set global default subscriber: {e}"))?;

    Ok(())
}
