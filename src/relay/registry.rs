// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    logging::{EventLogger, LogArg},
    relay::client::RelayClient,
};

/// Session id → ordered member list.
///
/// One mutex spans membership mutation and publish iteration; a session is
/// created on first join and dropped when its last member leaves. Session
/// id 0 means "no session" and never appears as a key.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u8, Vec<Arc<RelayClient>>>>,
    logger: Arc<EventLogger>,
}

impl SessionRegistry {
    pub fn new(logger: Arc<EventLogger>) -> Self {
        SessionRegistry { sessions: Mutex::new(HashMap::new()), logger }
    }

    /// Adds the client to the session unless already a member.
    pub async fn join(&self, client: &Arc<RelayClient>, session: u8) {
        if session == 0 {
            return;
        }
        let mut sessions = self.sessions.lock().await;
        let members = sessions.entry(session).or_default();
        if !members.iter().any(|m| Arc::ptr_eq(m, client)) {
            members.push(Arc::clone(client));
        }
        drop(sessions);
        client.log(
            &self.logger,
            vec![LogArg::str("joined session"), LogArg::str(session.to_string())],
        );
    }

    /// Removes the client; a no-op when the client is not a member or the
    /// session does not exist (another task may have removed it already).
    pub async fn leave(&self, client: &Arc<RelayClient>, session: u8) {
        let mut sessions = self.sessions.lock().await;
        let Some(members) = sessions.get_mut(&session) else { return };
        let Some(pos) = members.iter().position(|m| Arc::ptr_eq(m, client)) else {
            return;
        };
        members.remove(pos);
        if members.is_empty() {
            sessions.remove(&session);
        }
        drop(sessions);
        client.log(
            &self.logger,
            vec![LogArg::str("left session"), LogArg::str(session.to_string())],
        );
    }

    /// Writes every payload, in order, to every member except the origin.
    ///
    /// A failed peer write is suppressed: that peer's own reader task will
    /// observe the disconnect and run the normal leave path.
    pub async fn publish(
        &self,
        session: u8,
        payloads: &[Bytes],
        origin: &Arc<RelayClient>,
    ) {
        let sessions = self.sessions.lock().await;
        let Some(members) = sessions.get(&session) else { return };

        for member in members {
            if Arc::ptr_eq(member, origin) {
                continue;
            }
            for payload in payloads {
                if let Err(e) = member.send_frame(payload).await {
                    debug!("publish to {} failed: {e}", member.origin());
                    break;
                }
            }
        }

        let reached = members.len().saturating_sub(1);
        drop(sessions);
        self.logger.log_strs(
            "server",
            &["Publish reached", &reached.to_string(), "clients"],
            "0",
            None,
        );
    }

    /// Current member count of a session (0 when absent).
    pub async fn session_size(&self, session: u8) -> usize {
        self.sessions.lock().await.get(&session).map_or(0, Vec::len)
    }

    /// Whether the session currently exists.
    pub async fn has_session(&self, session: u8) -> bool {
        self.sessions.lock().await.contains_key(&session)
    }
}
