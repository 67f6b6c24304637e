// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::{
    cfg::enums::RedactMode,
    logging::event::{EventArg, LogArg, LogEvent, inbound_frame_payload},
    nfc::indexer::ApduIndexer,
    store::logs,
};

/// The structured event logger.
///
/// One instance is shared by the relay, the plugins, the registry and the
/// retention sweeper. A single mutex serializes the write-side DB
/// connection and the monthly JSONL appends, which is what orders events
/// and keeps the two sinks consistent with each other. Every failure past
/// the console line is swallowed: logging must never take the relay down.
pub struct EventLogger {
    redact: RedactMode,
    log_dir: PathBuf,
    file_enabled: bool,
    indexer: ApduIndexer,
    sink: Mutex<Option<Connection>>,
}

impl EventLogger {
    pub fn new(
        redact: RedactMode,
        log_dir: PathBuf,
        db: Option<Connection>,
        indexer: ApduIndexer,
        file_enabled: bool,
    ) -> Self {
        EventLogger { redact, log_dir, file_enabled, indexer, sink: Mutex::new(db) }
    }

    pub fn redact_mode(&self) -> RedactMode {
        self.redact
    }

    pub fn db_enabled(&self) -> bool {
        self.lock_sink().is_some()
    }

    /// Records one event: console line, DB row (+ raw payload + APDU
    /// analytics, atomically), JSONL line.
    pub fn log(&self, tag: &str, args: Vec<LogArg>, origin: &str, session: Option<u8>) {
        let now = Utc::now();
        let ts_iso = now.to_rfc3339_opts(SecondsFormat::Secs, false);
        let ts_unix = now.timestamp();

        let rendered: Vec<String> = args.iter().map(LogArg::render).collect();
        println!("{ts_iso} [{tag}] {origin} {}", rendered.join(" "));

        // When payload bytes are redacted, keep the original inbound frame
        // so APDU analytics still sees it.
        let raw_payload = if self.redact != RedactMode::Full && tag == "server" {
            inbound_frame_payload(&args).cloned()
        } else {
            None
        };

        let event_args: Vec<EventArg> =
            args.iter().map(|a| a.to_event_arg(self.redact)).collect();

        let mut guard = self.lock_sink();
        if let Some(conn) = guard.as_mut()
            && let Err(e) = self.persist(
                conn,
                ts_unix,
                &ts_iso,
                tag,
                origin,
                session,
                &event_args,
                raw_payload.as_deref(),
            )
        {
            debug!("event persist failed: {e}");
        }

        if self.file_enabled {
            let event = LogEvent {
                ts: &ts_iso,
                tag,
                origin,
                session,
                args: &event_args,
            };
            if let Err(e) = self.append_jsonl(&now, &event) {
                debug!("jsonl append failed: {e}");
            }
        }
    }

    /// Convenience for all-string events.
    pub fn log_strs(&self, tag: &str, args: &[&str], origin: &str, session: Option<u8>) {
        self.log(tag, args.iter().map(|a| LogArg::str(*a)).collect(), origin, session)
    }

    /// Retention hook: drops rows older than the cutoff under the same
    /// mutex the event pipeline uses.
    pub fn delete_older_than(&self, cutoff_unix: i64) {
        let guard = self.lock_sink();
        if let Some(conn) = guard.as_ref()
            && let Err(e) = logs::delete_older_than(conn, cutoff_unix)
        {
            debug!("retention delete failed: {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        conn: &mut Connection,
        ts_unix: i64,
        ts_iso: &str,
        tag: &str,
        origin: &str,
        session: Option<u8>,
        event_args: &[EventArg],
        raw_payload: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let args_json = serde_json::to_string(event_args)?;
        let session = session.map(i64::from);

        let tx = conn.transaction()?;
        let log_id =
            logs::insert_event(&tx, ts_unix, ts_iso, tag, origin, session, &args_json)?;
        if let Some(raw) = raw_payload
            && let Err(e) = logs::insert_payload(&tx, log_id, raw)
        {
            debug!("raw payload insert failed: {e}");
        }
        self.indexer
            .index_event(&tx, log_id, ts_unix, tag, origin, session, event_args);
        tx.commit()?;
        Ok(())
    }

    fn append_jsonl(
        &self,
        now: &chrono::DateTime<Utc>,
        event: &LogEvent<'_>,
    ) -> anyhow::Result<()> {
        let month = now.format("%Y-%m").to_string();
        let month_dir = self.log_dir.join(&month);
        fs::create_dir_all(&month_dir)?;
        let path = month_dir.join(format!("{month}.jsonl"));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
