// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::Result;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc, task::spawn_blocking};

use crate::{
    admin::{auth, error::ApiError},
    cfg::enums::RedactMode,
    retention::RetentionSettings,
    store::{admin as admin_store, logs, schema},
};

const SERVER_IDENT: &str = "nfcgate-relay-rs";

const READ_BUSY: Duration = Duration::from_secs(5);
const HEALTH_BUSY: Duration = Duration::from_secs(2);
const EXPORT_BUSY: Duration = Duration::from_secs(10);

/// Everything a request handler needs; cheap to clone into blocking tasks.
#[derive(Clone)]
pub struct AdminState {
    pub db_path: PathBuf,
    pub started_unix: i64,
    pub log_bytes_mode: RedactMode,
    pub protobuf_indexing: bool,
    pub token_ttl_seconds: i64,
    pub retention: RetentionSettings,
}

/// The admin requesting an authenticated operation.
#[derive(Debug, Clone)]
struct AuthedAdmin {
    id: i64,
    username: String,
}

impl AuthedAdmin {
    fn as_json(&self) -> Value {
        json!({ "id": self.id, "username": self.username })
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/bootstrap", post(auth_bootstrap))
        .route("/api/admin/users", get(users_list).post(users_create))
        .route("/api/admin/users/{id}", axum::routing::patch(user_update).delete(user_delete))
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/export", get(logs_export))
        .route("/api/apdu/stats", get(apdu_stats))
        .fallback(not_found)
        .with_state(state)
}

/// Serves the admin API until the process exits.
pub async fn serve(listener: TcpListener, state: AdminState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

fn no_store_json(status: StatusCode, value: Value) -> Response {
    (status, [(header::CACHE_CONTROL, "no-store")], Json(value)).into_response()
}

// ── auth plumbing ────────────────────────────────────────────────────────

fn require_auth(state: &AdminState, headers: &HeaderMap) -> Result<AuthedAdmin, ApiError> {
    let token = auth::bearer_token(headers).ok_or(ApiError::MissingToken)?;
    let conn = schema::open_read(&state.db_path, READ_BUSY)
        .map_err(|_| ApiError::DbUnavailable)?;
    let hash = auth::token_hash(&token);
    match admin_store::token_user(&conn, &hash, Utc::now().timestamp()) {
        Ok(Some((id, username))) => Ok(AuthedAdmin { id, username }),
        _ => Err(ApiError::InvalidToken),
    }
}

async fn blocking_auth(state: AdminState, headers: HeaderMap) -> Result<AuthedAdmin, ApiError> {
    spawn_blocking(move || require_auth(&state, &headers))
        .await
        .map_err(|_| ApiError::InvalidToken)?
}

// ── body and parameter helpers ───────────────────────────────────────────

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|_| ApiError::BadJson)
}

/// Stringifies a JSON value the way the panel expects: strings verbatim,
/// absent/null empty, everything else via its JSON rendering.
fn value_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn credentials_from(body: &Value) -> Result<(String, String), ApiError> {
    let username = value_to_string(body.get("username")).trim().to_string();
    let password = value_to_string(body.get("password"));
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::MissingCredentials);
    }
    Ok((username, password))
}

fn row_filter(params: &HashMap<String, String>) -> logs::RowFilter {
    logs::RowFilter {
        tag: params.get("tag").filter(|s| !s.is_empty()).cloned(),
        origin: params.get("origin").filter(|s| !s.is_empty()).cloned(),
        session: params
            .get("session")
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok()),
    }
}

fn clamped_int(params: &HashMap<String, String>, key: &str, default: i64, max: i64) -> i64 {
    let value = params
        .get(key)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(default);
    value.clamp(1, max)
}

/// Accepts `2025-12-17T12:34:56Z`, an explicit offset, or a naive
/// timestamp taken as UTC.
fn parse_iso8601_epoch(value: &str) -> Result<i64, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::BadDatetime("missing datetime".into()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Ok(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(v, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    Err(ApiError::BadDatetime("invalid datetime".into()))
}

fn time_range(params: &HashMap<String, String>) -> Result<(i64, i64), ApiError> {
    let from = parse_iso8601_epoch(params.get("from").map_or("", String::as_str))?;
    let to = parse_iso8601_epoch(params.get("to").map_or("", String::as_str))?;
    if to < from {
        return Err(ApiError::RangeOrder);
    }
    Ok((from, to))
}

fn user_id_from_path(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

fn map_insert_err(e: rusqlite::Error, fallback: ApiError) -> ApiError {
    match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ApiError::UsernameTaken
        },
        _ => fallback,
    }
}

fn user_json(user: &admin_store::AdminUser) -> Value {
    json!({
        "id": user.id,
        "username": user.username,
        "created_unix": user.created_unix,
        "disabled": user.disabled,
    })
}

// ── public endpoints ─────────────────────────────────────────────────────

async fn health(State(state): State<AdminState>) -> Response {
    let db_path = state.db_path.clone();
    let (db_file_bytes, counts) = spawn_blocking(move || {
        let bytes = fs::metadata(&db_path).map(|m| m.len()).ok();
        let counts = schema::open_read(&db_path, HEALTH_BUSY)
            .ok()
            .and_then(|conn| logs::health_counts(&conn).ok());
        (bytes, counts)
    })
    .await
    .unwrap_or((None, None));

    let now = Utc::now().timestamp();
    let payload = json!({
        "status": "ok",
        "server": SERVER_IDENT,
        "db_configured": true,
        "protobuf_indexing": state.protobuf_indexing,
        "started_unix": state.started_unix,
        "uptime_seconds": (now - state.started_unix).max(0),
        "log_bytes_mode": state.log_bytes_mode.as_str(),
        "db_file_bytes": db_file_bytes,
        "counts": counts.as_ref().map(|c| json!({
            "logs": c.logs,
            "apdu_events": c.apdu_events,
            "payloads": c.payloads,
        })),
        "latest": counts.as_ref().map(|c| json!({
            "log_ts_unix": c.last_log_ts_unix,
            "apdu_ts_unix": c.last_apdu_ts_unix,
        })),
        "retention": {
            "db_days": state.retention.db_days,
            "jsonl_days": state.retention.jsonl_days,
            "sweep_seconds": state.retention.sweep_seconds,
        },
    });
    no_store_json(StatusCode::OK, payload)
}

async fn auth_status(State(state): State<AdminState>) -> Result<Response, ApiError> {
    spawn_blocking(move || {
        let conn = schema::open_read(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        let has_admins = admin_store::count_active_admins(&conn)
            .map(|n| n > 0)
            .unwrap_or(false);
        Ok(no_store_json(StatusCode::OK, json!({ "has_admins": has_admins })))
    })
    .await
    .map_err(|_| ApiError::DbUnavailable)?
}

async fn auth_login(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let (username, password) = credentials_from(&body)?;

    spawn_blocking(move || {
        let conn = schema::open_admin_rw(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        schema::ensure_admin_schema(&conn).map_err(|_| ApiError::LoginFailed)?;

        let active = admin_store::count_active_admins(&conn)
            .map_err(|_| ApiError::LoginFailed)?;
        if active == 0 {
            return Err(ApiError::NoAdmins);
        }

        let credential = admin_store::credential_for(&conn, &username)
            .map_err(|_| ApiError::LoginFailed)?
            .ok_or(ApiError::InvalidCredentials)?;
        if credential.disabled
            || !auth::verify_password(
                &password,
                &credential.salt,
                &credential.hash,
                credential.iterations,
            )
        {
            return Err(ApiError::InvalidCredentials);
        }

        let issued = auth::issue_token(&conn, credential.user_id, state.token_ttl_seconds)
            .map_err(|_| ApiError::LoginFailed)?;
        Ok(no_store_json(
            StatusCode::OK,
            json!({
                "token": issued.token,
                "expires_unix": issued.expires_unix,
                "user": { "id": credential.user_id, "username": username },
            }),
        ))
    })
    .await
    .map_err(|_| ApiError::LoginFailed)?
}

async fn auth_bootstrap(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let (username, password) = credentials_from(&body)?;

    spawn_blocking(move || {
        let conn = schema::open_admin_rw(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        schema::ensure_admin_schema(&conn).map_err(|_| ApiError::BootstrapFailed)?;

        let active = admin_store::count_active_admins(&conn)
            .map_err(|_| ApiError::BootstrapFailed)?;
        if active > 0 {
            return Err(ApiError::AlreadyInitialized);
        }

        let record = auth::hash_password(&password);
        let user_id = admin_store::insert_user(
            &conn,
            &username,
            &record.salt,
            &record.hash,
            record.iterations,
            Utc::now().timestamp(),
        )
        .map_err(|e| map_insert_err(e, ApiError::BootstrapFailed))?;

        let issued = auth::issue_token(&conn, user_id, state.token_ttl_seconds)
            .map_err(|_| ApiError::BootstrapFailed)?;
        Ok(no_store_json(
            StatusCode::CREATED,
            json!({
                "token": issued.token,
                "expires_unix": issued.expires_unix,
                "user": { "id": user_id, "username": username },
            }),
        ))
    })
    .await
    .map_err(|_| ApiError::BootstrapFailed)?
}

// ── user management ──────────────────────────────────────────────────────

async fn users_list(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    spawn_blocking(move || {
        require_auth(&state, &headers)?;
        let conn = schema::open_read(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        let users = admin_store::list_users(&conn).map_err(|_| ApiError::ListFailed)?;
        let users: Vec<Value> = users.iter().map(user_json).collect();
        Ok(no_store_json(StatusCode::OK, json!({ "users": users })))
    })
    .await
    .map_err(|_| ApiError::ListFailed)?
}

async fn users_create(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    spawn_blocking(move || {
        let actor = require_auth(&state, &headers)?;
        let body = parse_body(&body)?;
        let (username, password) = credentials_from(&body)?;

        let conn = schema::open_admin_rw(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        schema::ensure_admin_schema(&conn).map_err(|_| ApiError::CreateFailed)?;

        let record = auth::hash_password(&password);
        let now = Utc::now().timestamp();
        let user_id = admin_store::insert_user(
            &conn,
            &username,
            &record.salt,
            &record.hash,
            record.iterations,
            now,
        )
        .map_err(|e| map_insert_err(e, ApiError::CreateFailed))?;

        Ok(no_store_json(
            StatusCode::CREATED,
            json!({
                "created": {
                    "id": user_id,
                    "username": username,
                    "created_unix": now,
                    "disabled": false,
                },
                "created_by": actor.as_json(),
            }),
        ))
    })
    .await
    .map_err(|_| ApiError::CreateFailed)?
}

async fn user_update(
    State(state): State<AdminState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    spawn_blocking(move || {
        let actor = require_auth(&state, &headers)?;
        let user_id = user_id_from_path(&raw_id)?;
        let body = parse_body(&body)?;
        if !body.is_object() {
            return Err(ApiError::BadJson);
        }

        let wants_password = matches!(body.get("password"), Some(v) if !v.is_null());
        let wants_disabled = matches!(body.get("disabled"), Some(v) if !v.is_null());
        if !wants_password && !wants_disabled {
            return Err(ApiError::MissingFields);
        }

        let password = value_to_string(body.get("password"));
        if wants_password && password.is_empty() {
            return Err(ApiError::MissingPassword);
        }

        let disabled_val = body.get("disabled").is_some_and(value_truthy);
        if wants_disabled && disabled_val && actor.id == user_id {
            return Err(ApiError::CannotDisableSelf);
        }

        let conn = schema::open_admin_rw(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        schema::ensure_admin_schema(&conn).map_err(|_| ApiError::UpdateFailed)?;

        if admin_store::get_user(&conn, user_id)
            .map_err(|_| ApiError::UpdateFailed)?
            .is_none()
        {
            return Err(ApiError::NotFound);
        }

        if wants_password {
            let record = auth::hash_password(&password);
            admin_store::set_password(
                &conn,
                user_id,
                &record.salt,
                &record.hash,
                record.iterations,
            )
            .map_err(|_| ApiError::UpdateFailed)?;
        }
        if wants_disabled {
            admin_store::set_disabled(&conn, user_id, disabled_val)
                .map_err(|_| ApiError::UpdateFailed)?;
        }

        // Password change or disable invalidates every outstanding token.
        if wants_password || (wants_disabled && disabled_val) {
            admin_store::revoke_tokens(&conn, user_id)
                .map_err(|_| ApiError::UpdateFailed)?;
        }

        let user = admin_store::get_user(&conn, user_id)
            .map_err(|_| ApiError::UpdateFailed)?
            .ok_or(ApiError::NotFound)?;
        Ok(no_store_json(
            StatusCode::OK,
            json!({ "updated": user_json(&user), "updated_by": actor.as_json() }),
        ))
    })
    .await
    .map_err(|_| ApiError::UpdateFailed)?
}

async fn user_delete(
    State(state): State<AdminState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    spawn_blocking(move || {
        let actor = require_auth(&state, &headers)?;
        let user_id = user_id_from_path(&raw_id)?;
        if actor.id == user_id {
            return Err(ApiError::CannotDeleteSelf);
        }

        let conn = schema::open_admin_rw(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        schema::ensure_admin_schema(&conn).map_err(|_| ApiError::DeleteFailed)?;

        let user = admin_store::get_user(&conn, user_id)
            .map_err(|_| ApiError::DeleteFailed)?
            .ok_or(ApiError::NotFound)?;
        admin_store::delete_user(&conn, user_id).map_err(|_| ApiError::DeleteFailed)?;

        Ok(no_store_json(
            StatusCode::OK,
            json!({
                "deleted": { "id": user.id, "username": user.username },
                "deleted_by": actor.as_json(),
            }),
        ))
    })
    .await
    .map_err(|_| ApiError::DeleteFailed)?
}

// ── log queries ──────────────────────────────────────────────────────────

fn log_row_json(row: &logs::LogRow) -> Value {
    let args: Value = serde_json::from_str(&row.args_json).unwrap_or_else(|_| json!([]));
    json!({
        "ts": row.ts_iso,
        "tag": row.tag,
        "origin": row.origin,
        "session": row.session,
        "args": args,
    })
}

async fn logs_tail(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    blocking_auth(state.clone(), headers).await?;

    let limit = clamped_int(&params, "limit", 200, 1000);
    let filter = row_filter(&params);

    spawn_blocking(move || {
        let conn = schema::open_read(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        let rows = logs::tail(&conn, &filter, limit).map_err(|_| ApiError::ListFailed)?;
        let rows: Vec<Value> = rows.iter().map(log_row_json).collect();
        Ok(no_store_json(StatusCode::OK, json!({ "rows": rows })))
    })
    .await
    .map_err(|_| ApiError::ListFailed)?
}

async fn logs_export(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    blocking_auth(state.clone(), headers).await?;

    let (from, to) = time_range(&params)?;
    let mut format = params
        .get("format")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    if format.is_empty() {
        format = "jsonl".to_string();
    }
    if format != "jsonl" && format != "csv" {
        return Err(ApiError::BadFormat);
    }
    let is_csv = format == "csv";
    let filter = row_filter(&params);

    let from_s = params.get("from").cloned().unwrap_or_default();
    let to_s = params.get("to").cloned().unwrap_or_default();
    let filename = format!(
        "logs_{}_{}.{format}",
        from_s.replace(':', "-"),
        to_s.replace(':', "-")
    );
    let content_type = if is_csv {
        "text/csv; charset=utf-8"
    } else {
        "application/x-ndjson; charset=utf-8"
    };

    let db_path = state.db_path.clone();
    let conn = spawn_blocking(move || schema::open_read(&db_path, EXPORT_BUSY))
        .await
        .map_err(|_| ApiError::DbUnavailable)?
        .map_err(|_| ApiError::DbUnavailable)?;

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    spawn_blocking(move || stream_rows(conn, &filter, from, to, is_csv, &tx));

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
    });

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Runs on a blocking task: walks the range and feeds encoded lines into
/// the response channel. A closed channel (client gone) stops the walk.
fn stream_rows(
    conn: Connection,
    filter: &logs::RowFilter,
    from: i64,
    to: i64,
    is_csv: bool,
    tx: &mpsc::Sender<Bytes>,
) {
    if is_csv && tx.blocking_send(Bytes::from_static(b"ts,tag,origin,session,args\n")).is_err()
    {
        return;
    }
    let _ = logs::export_each(&conn, filter, from, to, |row| {
        let line = if is_csv { csv_line(&row) } else { jsonl_line(&row) };
        tx.blocking_send(Bytes::from(line)).is_ok()
    });
}

fn jsonl_line(row: &logs::LogRow) -> String {
    let mut line = log_row_json(row).to_string();
    line.push('\n');
    line
}

fn csv_line(row: &logs::LogRow) -> String {
    let session = row.session.map(|s| s.to_string()).unwrap_or_default();
    let fields = [
        row.ts_iso.as_str(),
        row.tag.as_str(),
        row.origin.as_str(),
        session.as_str(),
        row.args_json.as_str(),
    ];
    let mut line = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn csv_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ── APDU statistics ──────────────────────────────────────────────────────

async fn apdu_stats(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    blocking_auth(state.clone(), headers).await?;

    let (from, to) = time_range(&params)?;
    let top = clamped_int(&params, "top", 20, 200);
    let filter = row_filter(&params);
    let from_s = params.get("from").cloned().unwrap_or_default();
    let to_s = params.get("to").cloned().unwrap_or_default();

    spawn_blocking(move || {
        let conn = schema::open_read(&state.db_path, READ_BUSY)
            .map_err(|_| ApiError::DbUnavailable)?;
        let stats = logs::apdu_stats(&conn, &filter, from, to, top)
            .map_err(|_| ApiError::ListFailed)?;

        let commands_reader: Vec<Value> = stats
            .commands_reader
            .iter()
            .map(|b| json!({ "cla_ins": b.key, "count": b.count }))
            .collect();
        let commands_reader_header4: Vec<Value> = stats
            .commands_reader_header4
            .iter()
            .map(|b| json!({ "header4": b.key, "count": b.count }))
            .collect();
        let responses_card_sw: Vec<Value> = stats
            .responses_card_sw
            .iter()
            .map(|b| json!({ "sw": b.key, "count": b.count }))
            .collect();

        Ok(no_store_json(
            StatusCode::OK,
            json!({
                "from": from_s,
                "to": to_s,
                "parsed_apdu": stats.total,
                "parse_errors": 0,
                "total_log_rows_scanned": null,
                "highlight": { "80CA": stats.get_data_80ca },
                "commands_reader": commands_reader,
                "commands_reader_header4": commands_reader_header4,
                "responses_card_sw": responses_card_sw,
            }),
        ))
    })
    .await
    .map_err(|_| ApiError::ListFailed)?
}
