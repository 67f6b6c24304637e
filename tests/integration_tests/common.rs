// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use nfcgate_relay_rs::{
    admin::api::AdminState,
    cfg::enums::RedactMode,
    logging::EventLogger,
    nfc::{indexer::ApduIndexer, proto::EnvelopeDecoder},
    relay::{plugins::PluginChain, registry::SessionRegistry, server::RelayServer},
    retention::RetentionSettings,
    store::schema,
};
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    time::{sleep, timeout},
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

pub const WAIT: Duration = Duration::from_secs(5);

/// A relay listening on an ephemeral loopback port, backed by a scratch
/// store and log directory that vanish with the value.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub logger: Arc<EventLogger>,
    pub registry: Arc<SessionRegistry>,
    pub cancel: CancellationToken,
    pub dir: TempDir,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_relay(mode: RedactMode) -> TestRelay {
    start_relay_with(mode, PluginChain::empty(), None).await
}

pub async fn start_relay_with(
    mode: RedactMode,
    plugins: PluginChain,
    tls: Option<TlsAcceptor>,
) -> TestRelay {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("logs.sqlite3");
    let db = schema::open_rw(&db_path).expect("log store");

    let indexer = ApduIndexer::new(Some(Arc::new(EnvelopeDecoder)));
    let logger = Arc::new(EventLogger::new(
        mode,
        dir.path().to_path_buf(),
        Some(db),
        indexer,
        true,
    ));
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&logger)));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let cancel = CancellationToken::new();

    let server = RelayServer::new(
        Arc::clone(&logger),
        Arc::clone(&registry),
        Arc::new(plugins),
        tls,
    );
    tokio::spawn(server.run(listener, cancel.clone()));

    TestRelay { addr, db_path, logger, registry, cancel, dir }
}

// ── relay wire helpers ───────────────────────────────────────────────────

pub async fn send_frame<S>(stream: &mut S, session: u8, payload: &[u8])
where S: AsyncWrite + Unpin {
    let mut wire = Vec::with_capacity(5 + payload.len());
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.push(session);
    wire.extend_from_slice(payload);
    stream.write_all(&wire).await.expect("send frame");
}

pub async fn recv_frame<S>(stream: &mut S) -> Vec<u8>
where S: AsyncRead + Unpin {
    timeout(WAIT, async {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.expect("frame length");
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).await.expect("frame payload");
        payload
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Asserts that nothing arrives for a little while.
pub async fn expect_silence<S>(stream: &mut S)
where S: AsyncRead + Unpin {
    let mut buf = [0u8; 1];
    let idle = timeout(Duration::from_millis(300), stream.read(&mut buf)).await;
    match idle {
        Err(_) => {},
        Ok(Ok(0)) => panic!("peer closed while silence was expected"),
        Ok(read) => panic!("unexpected data while silence was expected: {read:?}"),
    }
}

/// Asserts that the server closes the connection.
pub async fn expect_eof<S>(stream: &mut S)
where S: AsyncRead + Unpin {
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("timed out waiting for close")
        .expect("read while waiting for close");
    assert_eq!(n, 0, "expected server-side close, got {n} bytes");
}

// ── polling helpers ──────────────────────────────────────────────────────

pub async fn eventually<F>(mut cond: F, what: &str)
where F: FnMut() -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never held: {what}");
}

pub async fn eventually_async<F, Fut>(mut cond: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond().await {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never held: {what}");
}

pub fn open_db(path: &PathBuf) -> Connection {
    schema::open_read(path, Duration::from_secs(5)).expect("open store read-only")
}

// ── admin API helpers ────────────────────────────────────────────────────

pub fn admin_state(db_path: &PathBuf) -> AdminState {
    AdminState {
        db_path: db_path.clone(),
        started_unix: Utc::now().timestamp(),
        log_bytes_mode: RedactMode::Full,
        protobuf_indexing: true,
        token_ttl_seconds: 3600,
        retention: RetentionSettings { db_days: 0, jsonl_days: 0, sweep_seconds: 3600 },
    }
}

pub async fn request_raw(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<&Value>,
) -> (StatusCode, axum::body::Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-NFCGate-Token", token);
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(value).expect("body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("dispatch");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body");
    (status, bytes)
}

pub async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<&Value>,
) -> (StatusCode, Value) {
    let (status, bytes) = request_raw(app, method, uri, token, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
