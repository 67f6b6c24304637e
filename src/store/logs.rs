// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value};

/// One persisted log event, as returned by the query surface.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub ts_iso: String,
    pub tag: String,
    pub origin: String,
    pub session: Option<i64>,
    pub args_json: String,
}

/// Derived APDU analytics row.
#[derive(Debug, Clone, PartialEq)]
pub struct ApduEventRow {
    pub ts_unix: i64,
    /// `"R"` reader→card, `"C"` card→reader.
    pub direction: &'static str,
    pub cla_ins: Option<String>,
    pub header4: Option<String>,
    pub sw: Option<String>,
    pub apdu_len: i64,
    pub origin: String,
    pub tag: String,
    pub session: Option<i64>,
}

/// Equality filters shared by tail/export/stats.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub tag: Option<String>,
    pub origin: Option<String>,
    pub session: Option<i64>,
}

impl RowFilter {
    fn apply(&self, clauses: &mut Vec<&'static str>, params: &mut Vec<Value>) {
        if let Some(tag) = &self.tag {
            clauses.push("tag = ?");
            params.push(Value::Text(tag.clone()));
        }
        if let Some(origin) = &self.origin {
            clauses.push("origin = ?");
            params.push(Value::Text(origin.clone()));
        }
        if let Some(session) = self.session {
            clauses.push("session = ?");
            params.push(Value::Integer(session));
        }
    }
}

pub fn insert_event(
    conn: &Connection,
    ts_unix: i64,
    ts_iso: &str,
    tag: &str,
    origin: &str,
    session: Option<i64>,
    args_json: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO logs (ts_unix, ts_iso, tag, origin, session, args_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![ts_unix, ts_iso, tag, origin, session, args_json],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_payload(conn: &Connection, log_id: i64, payload: &[u8]) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO payloads (log_id, payload) VALUES (?1, ?2)",
        params![log_id, payload],
    )?;
    Ok(())
}

pub fn payload_for(conn: &Connection, log_id: i64) -> rusqlite::Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT payload FROM payloads WHERE log_id = ?1",
        params![log_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_apdu_event(conn: &Connection, event: &ApduEventRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO apdu_events \
         (ts_unix, direction, cla_ins, header4, sw, apdu_len, origin, tag, session) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.ts_unix,
            event.direction,
            event.cla_ins,
            event.header4,
            event.sw,
            event.apdu_len,
            event.origin,
            event.tag,
            event.session,
        ],
    )?;
    Ok(())
}

/// Most recent rows first, stably ordered by `(ts_unix, id)`.
pub fn tail(conn: &Connection, filter: &RowFilter, limit: i64) -> rusqlite::Result<Vec<LogRow>> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    filter.apply(&mut clauses, &mut params);

    let mut sql =
        String::from("SELECT ts_iso, tag, origin, session, args_json FROM logs");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ts_unix DESC, id DESC LIMIT ?");
    params.push(Value::Integer(limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), row_to_log)?;
    rows.collect()
}

/// Streams rows whose `ts_unix` lies in the inclusive range, ascending.
/// The callback returns `false` to stop early (broken client).
pub fn export_each(
    conn: &Connection,
    filter: &RowFilter,
    from_unix: i64,
    to_unix: i64,
    mut each: impl FnMut(LogRow) -> bool,
) -> rusqlite::Result<()> {
    let mut clauses = vec!["ts_unix >= ?", "ts_unix <= ?"];
    let mut params = vec![Value::Integer(from_unix), Value::Integer(to_unix)];
    filter.apply(&mut clauses, &mut params);

    let sql = format!(
        "SELECT ts_iso, tag, origin, session, args_json FROM logs WHERE {} \
         ORDER BY ts_unix ASC, id ASC",
        clauses.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    while let Some(row) = rows.next()? {
        let log = LogRow {
            ts_iso: row.get(0)?,
            tag: row.get(1)?,
            origin: row.get(2)?,
            session: row.get(3)?,
            args_json: row.get(4)?,
        };
        if !each(log) {
            break;
        }
    }
    Ok(())
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        ts_iso: row.get(0)?,
        tag: row.get(1)?,
        origin: row.get(2)?,
        session: row.get(3)?,
        args_json: row.get(4)?,
    })
}

/// One aggregation bucket (`cla_ins`, `header4` or `sw` value with count).
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCount {
    pub key: String,
    pub count: i64,
}

/// Aggregated APDU statistics for a time range.
#[derive(Debug, Clone, Default)]
pub struct ApduStats {
    pub total: i64,
    /// Count of reader commands with `cla_ins == "80CA"` (GET DATA).
    pub get_data_80ca: i64,
    pub commands_reader: Vec<BucketCount>,
    pub commands_reader_header4: Vec<BucketCount>,
    pub responses_card_sw: Vec<BucketCount>,
}

pub fn apdu_stats(
    conn: &Connection,
    filter: &RowFilter,
    from_unix: i64,
    to_unix: i64,
    top: i64,
) -> rusqlite::Result<ApduStats> {
    let mut clauses = vec!["ts_unix >= ?", "ts_unix <= ?"];
    let mut params = vec![Value::Integer(from_unix), Value::Integer(to_unix)];
    filter.apply(&mut clauses, &mut params);
    let where_sql = clauses.join(" AND ");

    let total = conn.query_row(
        &format!("SELECT COUNT(*) FROM apdu_events WHERE {where_sql}"),
        params_from_iter(params.clone()),
        |row| row.get(0),
    )?;

    let get_data_80ca = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM apdu_events WHERE {where_sql} \
             AND direction = 'R' AND cla_ins = '80CA'"
        ),
        params_from_iter(params.clone()),
        |row| row.get(0),
    )?;

    let bucket = |column: &str, direction: &str| -> rusqlite::Result<Vec<BucketCount>> {
        let sql = format!(
            "SELECT {column}, COUNT(*) c FROM apdu_events WHERE {where_sql} \
             AND direction = '{direction}' AND {column} IS NOT NULL \
             GROUP BY {column} ORDER BY c DESC LIMIT ?"
        );
        let mut bucket_params = params.clone();
        bucket_params.push(Value::Integer(top));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bucket_params), |row| {
            Ok(BucketCount { key: row.get(0)?, count: row.get(1)? })
        })?;
        rows.collect()
    };

    Ok(ApduStats {
        total,
        get_data_80ca,
        commands_reader: bucket("cla_ins", "R")?,
        commands_reader_header4: bucket("header4", "R")?,
        responses_card_sw: bucket("sw", "C")?,
    })
}

/// Row counts and latest timestamps reported by the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct HealthCounts {
    pub logs: i64,
    pub apdu_events: i64,
    pub payloads: Option<i64>,
    pub last_log_ts_unix: Option<i64>,
    pub last_apdu_ts_unix: Option<i64>,
}

pub fn health_counts(conn: &Connection) -> rusqlite::Result<HealthCounts> {
    let logs = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
    let apdu_events =
        conn.query_row("SELECT COUNT(*) FROM apdu_events", [], |row| row.get(0))?;
    // Tolerate stores from before the payloads table existed.
    let payloads = conn
        .query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))
        .ok();
    let last_log_ts_unix =
        conn.query_row("SELECT MAX(ts_unix) FROM logs", [], |row| row.get(0))?;
    let last_apdu_ts_unix =
        conn.query_row("SELECT MAX(ts_unix) FROM apdu_events", [], |row| row.get(0))?;
    Ok(HealthCounts { logs, apdu_events, payloads, last_log_ts_unix, last_apdu_ts_unix })
}

/// Retention delete: rows strictly older than `cutoff_unix`, including the
/// raw payload blobs whose log row is going away.
pub fn delete_older_than(conn: &Connection, cutoff_unix: i64) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM payloads WHERE log_id IN (SELECT id FROM logs WHERE ts_unix < ?1)",
        params![cutoff_unix],
    )?;
    conn.execute("DELETE FROM logs WHERE ts_unix < ?1", params![cutoff_unix])?;
    conn.execute("DELETE FROM apdu_events WHERE ts_unix < ?1", params![cutoff_unix])?;
    Ok(())
}
