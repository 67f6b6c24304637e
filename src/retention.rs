// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logging::EventLogger;

/// Retention knobs; a day count of 0 keeps data forever.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionSettings {
    pub db_days: i64,
    pub jsonl_days: i64,
    pub sweep_seconds: i64,
}

impl RetentionSettings {
    pub fn enabled(&self) -> bool {
        self.db_days > 0 || self.jsonl_days > 0
    }
}

/// Periodically drops aged log rows, APDU events and monthly JSONL
/// directories. Runs on its own task; DB deletions go through the logger's
/// mutex so they serialize with the event pipeline. Everything here is
/// best-effort.
pub struct RetentionSweeper {
    logger: Arc<EventLogger>,
    settings: RetentionSettings,
    log_dir: PathBuf,
}

impl RetentionSweeper {
    pub fn new(logger: Arc<EventLogger>, settings: RetentionSettings, log_dir: PathBuf) -> Self {
        RetentionSweeper { logger, settings, log_dir }
    }

    /// One sweep shortly after startup, then one every `sweep_seconds`.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(Duration::from_secs(5)) => {},
        }
        loop {
            self.sweep_once(Utc::now());
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(Duration::from_secs(self.settings.sweep_seconds.max(1) as u64)) => {},
            }
        }
    }

    pub fn sweep_once(&self, now: DateTime<Utc>) {
        if self.settings.db_days > 0 {
            let cutoff = now.timestamp() - self.settings.db_days * 86_400;
            self.logger.delete_older_than(cutoff);
        }
        if self.settings.jsonl_days > 0 {
            let cutoff = now - chrono::Duration::days(self.settings.jsonl_days);
            prune_month_dirs(&self.log_dir, cutoff);
        }
    }
}

/// Removes `YYYY-MM` directories whose last second lies strictly before the
/// cutoff. Anything that does not look like a month directory is left
/// alone.
pub fn prune_month_dirs(log_dir: &Path, cutoff: DateTime<Utc>) {
    let Ok(entries) = fs::read_dir(log_dir) else { return };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((year, month)) = parse_month_dir(name) else { continue };
        let Some(month_end) = month_last_second(year, month) else { continue };
        if month_end >= cutoff {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Err(e) = fs::remove_dir_all(&path) {
            debug!("failed to prune {}: {e}", path.display());
        }
    }
}

/// Strict `YYYY-MM` with a valid month number.
fn parse_month_dir(name: &str) -> Option<(i32, u32)> {
    let (y, m) = name.split_once('-')?;
    if y.len() != 4 || m.len() != 2 {
        return None;
    }
    if !y.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = y.parse().ok()?;
    let month = m.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

fn month_last_second(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_start = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()?;
    Some(next_start - chrono::Duration::seconds(1))
}
