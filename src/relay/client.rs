// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Mutex as StdMutex, PoisonError, atomic::AtomicU8, atomic::Ordering},
};

use tokio::{io::AsyncWrite, sync::Mutex};

use crate::logging::{EventLogger, LogArg};

/// Scratch state shared between the plugins handling one client.
pub type PluginState = HashMap<String, serde_json::Value>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live relay connection.
///
/// The write sink is behind its own async mutex so fan-out from different
/// sessions can never interleave partial frames. The session byte uses 0
/// for "no session", which the wire protocol reserves for exactly that.
pub struct RelayClient {
    origin: String,
    session: AtomicU8,
    writer: Mutex<BoxedWriter>,
    state: StdMutex<PluginState>,
}

impl RelayClient {
    pub fn new(peer: SocketAddr, writer: BoxedWriter) -> Self {
        RelayClient {
            origin: peer.to_string(),
            session: AtomicU8::new(0),
            writer: Mutex::new(writer),
            state: StdMutex::new(PluginState::new()),
        }
    }

    /// Stringified remote address, used as the log origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn session(&self) -> Option<u8> {
        match self.session.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set_session(&self, session: Option<u8>) {
        self.session.store(session.unwrap_or(0), Ordering::SeqCst);
    }

    /// Writes one outbound frame to this client.
    pub async fn send_frame(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        super::codec::write_frame(&mut *writer, payload).await
    }

    /// Emits a `"server"`-tagged event under this client's origin and
    /// current session.
    pub fn log(&self, logger: &EventLogger, args: Vec<LogArg>) {
        logger.log("server", args, self.origin(), self.session());
    }

    /// Runs `f` with exclusive access to the plugin scratch state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PluginState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("origin", &self.origin)
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}
