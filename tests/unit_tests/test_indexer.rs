// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use hex_literal::hex;
use nfcgate_relay_rs::{
    cfg::enums::RedactMode,
    logging::LogArg,
    nfc::{
        indexer::ApduIndexer,
        proto::{DataSource, EnvelopeDecoder, encode_envelope},
    },
    store::{logs, schema},
};
use rusqlite::{Connection, OptionalExtension};

fn store() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    schema::initialize_schema(&conn).expect("schema");
    conn
}

fn indexer() -> ApduIndexer {
    ApduIndexer::new(Some(Arc::new(EnvelopeDecoder)))
}

/// Args as the logger would produce them for an inbound frame.
fn frame_args(payload: &[u8], mode: RedactMode) -> Vec<nfcgate_relay_rs::logging::EventArg> {
    [
        LogArg::str("server"),
        LogArg::str("data:"),
        LogArg::Blob(Bytes::copy_from_slice(payload)),
    ]
    .iter()
    .map(|a| a.to_event_arg(mode))
    .collect()
}

fn apdu_row(
    conn: &Connection,
) -> Option<(String, Option<String>, Option<String>, Option<String>, i64)> {
    conn.query_row(
        "SELECT direction, cla_ins, header4, sw, apdu_len FROM apdu_events",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
    )
    .optional()
    .expect("query apdu row")
}

#[test]
fn test_reader_command_extraction() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Reader, &hex!("80CA9F7F00"), 1);
    let args = frame_args(&payload, RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", Some(7), "[]")?;

    indexer().index_event(&conn, log_id, 100, "server", "a:1", Some(7), &args);

    let (direction, cla_ins, header4, sw, apdu_len) =
        apdu_row(&conn).expect("one apdu row");
    assert_eq!(direction, "R");
    assert_eq!(cla_ins.as_deref(), Some("80CA"));
    assert_eq!(header4.as_deref(), Some("80CA9F7F"));
    assert_eq!(sw, None);
    assert_eq!(apdu_len, 5);
    Ok(())
}

#[test]
fn test_card_response_extraction() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Card, &hex!("6F1A84089000"), 1);
    let args = frame_args(&payload, RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);

    let (direction, cla_ins, header4, sw, apdu_len) =
        apdu_row(&conn).expect("one apdu row");
    assert_eq!(direction, "C");
    assert_eq!(cla_ins, None);
    assert_eq!(header4, None);
    assert_eq!(sw.as_deref(), Some("9000"));
    assert_eq!(apdu_len, 6);
    Ok(())
}

#[test]
fn test_short_reader_apdu_has_partial_headers() -> Result<()> {
    let conn = store();
    // Two bytes: cla_ins present, header4 absent.
    let payload = encode_envelope(DataSource::Reader, &hex!("80CA"), 1);
    let args = frame_args(&payload, RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);

    let (_, cla_ins, header4, _, apdu_len) = apdu_row(&conn).expect("one apdu row");
    assert_eq!(cla_ins.as_deref(), Some("80CA"));
    assert_eq!(header4, None);
    assert_eq!(apdu_len, 2);
    Ok(())
}

#[test]
fn test_empty_apdu_is_dropped() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Reader, &[], 1);
    let args = frame_args(&payload, RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);
    assert!(apdu_row(&conn).is_none());
    Ok(())
}

#[test]
fn test_undecodable_payload_is_ignored() -> Result<()> {
    let conn = store();
    let args = frame_args(b"just some bytes", RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);
    assert!(apdu_row(&conn).is_none());
    Ok(())
}

#[test]
fn test_non_frame_events_are_ignored() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Reader, &hex!("80CA9F7F00"), 1);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    // Wrong tag.
    let args = frame_args(&payload, RedactMode::Full);
    indexer().index_event(&conn, log_id, 100, "mitm", "a:1", None, &args);
    assert!(apdu_row(&conn).is_none());

    // Wrong arg shape.
    let args: Vec<_> = [LogArg::str("server"), LogArg::str("connected")]
        .iter()
        .map(|a| a.to_event_arg(RedactMode::Full))
        .collect();
    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);
    assert!(apdu_row(&conn).is_none());
    Ok(())
}

#[test]
fn test_redacted_event_uses_raw_payload_table() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Reader, &hex!("80CA9F7F00"), 1);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;
    logs::insert_payload(&conn, log_id, &payload)?;

    // Length-only args carry no hex, so the indexer must fall back to the
    // payloads row.
    let args = frame_args(&payload, RedactMode::Off);
    indexer().index_event(&conn, log_id, 100, "server", "a:1", None, &args);

    let (direction, cla_ins, ..) = apdu_row(&conn).expect("one apdu row");
    assert_eq!(direction, "R");
    assert_eq!(cla_ins.as_deref(), Some("80CA"));
    Ok(())
}

#[test]
fn test_missing_decoder_is_a_noop() -> Result<()> {
    let conn = store();
    let payload = encode_envelope(DataSource::Reader, &hex!("80CA9F7F00"), 1);
    let args = frame_args(&payload, RedactMode::Full);
    let log_id = logs::insert_event(&conn, 100, "iso", "server", "a:1", None, "[]")?;

    let indexer = ApduIndexer::new(None);
    assert!(!indexer.available());
    indexer.index_event(&conn, log_id, 100, "server", "a:1", None, &args);
    assert!(apdu_row(&conn).is_none());
    Ok(())
}

#[test]
fn test_envelope_decoder_roundtrip() {
    use nfcgate_relay_rs::nfc::{ApduDirection, NfcDecoder};

    let payload = encode_envelope(DataSource::Card, &hex!("9000"), 123);
    let decoded = EnvelopeDecoder.decode(&payload).expect("decodes");
    assert_eq!(decoded.direction, ApduDirection::Card);
    assert_eq!(decoded.apdu.as_ref(), hex!("9000"));

    // An empty buffer decodes to defaults whose data_source is out of range.
    assert!(EnvelopeDecoder.decode(b"").is_none());
}
