// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use crate::{
    logging::EventArg,
    nfc::{ApduDirection, NfcDecoder},
    store::logs::{self, ApduEventRow},
};

/// Derives `apdu_events` rows from freshly inserted log events.
///
/// Runs on the logger's write connection inside the same transaction as the
/// log row, so an event and its analytics commit atomically. Everything
/// here is best-effort: non-NFC payloads, a missing decoder, and storage
/// hiccups all leave the log event itself untouched.
pub struct ApduIndexer {
    decoder: Option<Arc<dyn NfcDecoder>>,
}

impl ApduIndexer {
    pub fn new(decoder: Option<Arc<dyn NfcDecoder>>) -> Self {
        ApduIndexer { decoder }
    }

    /// Whether a decoder capability is wired in.
    pub fn available(&self) -> bool {
        self.decoder.is_some()
    }

    /// Inspects one event; inserts at most one `apdu_events` row.
    #[allow(clippy::too_many_arguments)]
    pub fn index_event(
        &self,
        conn: &Connection,
        log_id: i64,
        ts_unix: i64,
        tag: &str,
        origin: &str,
        session: Option<i64>,
        args: &[EventArg],
    ) {
        let Some(decoder) = &self.decoder else { return };

        // Only raw inbound payloads from the relay handler are considered.
        if tag != "server" || args.len() < 3 {
            return;
        }
        if args[0].as_str() != Some("server") || args[1].as_str() != Some("data:") {
            return;
        }

        let Some(payload) = event_payload(conn, log_id, args) else { return };
        let Some(decoded) = decoder.decode(&payload) else { return };
        if decoded.apdu.is_empty() {
            return;
        }

        let apdu = &decoded.apdu;
        let (cla_ins, header4, sw) = match decoded.direction {
            ApduDirection::Reader => (
                (apdu.len() >= 2).then(|| hex::encode_upper(&apdu[..2])),
                (apdu.len() >= 4).then(|| hex::encode_upper(&apdu[..4])),
                None,
            ),
            ApduDirection::Card => (
                None,
                None,
                (apdu.len() >= 2).then(|| hex::encode_upper(&apdu[apdu.len() - 2..])),
            ),
        };

        let row = ApduEventRow {
            ts_unix,
            direction: decoded.direction.as_str(),
            cla_ins,
            header4,
            sw,
            apdu_len: apdu.len() as i64,
            origin: origin.to_string(),
            tag: tag.to_string(),
            session,
        };
        if let Err(e) = logs::insert_apdu_event(conn, &row) {
            debug!("apdu event insert failed: {e}");
        }
    }
}

/// The payload comes from the args when logged in full, otherwise from the
/// raw-payload side table written for redacted events.
fn event_payload(conn: &Connection, log_id: i64, args: &[EventArg]) -> Option<Vec<u8>> {
    for arg in args {
        if let EventArg::Bytes(descriptor) = arg
            && let Some(h) = &descriptor.hex
        {
            return hex::decode(h).ok();
        }
    }
    logs::payload_for(conn, log_id).ok().flatten()
}
