// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    logging::{EventLogger, LogArg},
    relay::{client::RelayClient, codec, plugins::PluginChain, registry::SessionRegistry},
};

/// Reads that stall longer than this terminate the connection.
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// The relay acceptor: one task per client, optional server-side TLS.
pub struct RelayServer {
    logger: Arc<EventLogger>,
    registry: Arc<SessionRegistry>,
    plugins: Arc<PluginChain>,
    tls: Option<TlsAcceptor>,
}

impl RelayServer {
    pub fn new(
        logger: Arc<EventLogger>,
        registry: Arc<SessionRegistry>,
        plugins: Arc<PluginChain>,
        tls: Option<TlsAcceptor>,
    ) -> Arc<Self> {
        Arc::new(RelayServer { logger, registry, plugins, tls })
    }

    /// Accepts connections until cancelled. Each client runs on its own
    /// task; client failures never reach this loop.
    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        self.logger.log_strs(
            "server",
            &["relay listening on", &local.to_string()],
            "0",
            None,
        );

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                },
                Err(e) => {
                    warn!("accept failed: {e}");
                },
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {peer}: {e}");
        }

        match &self.tls {
            Some(acceptor) => {
                match timeout(CLIENT_READ_TIMEOUT, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => self.serve_client(tls_stream, peer).await,
                    Ok(Err(e)) => debug!("TLS handshake with {peer} failed: {e}"),
                    Err(_) => debug!("TLS handshake with {peer} timed out"),
                }
            },
            None => self.serve_client(stream, peer).await,
        }
    }

    async fn serve_client<S>(&self, stream: S, peer: SocketAddr)
    where S: AsyncRead + AsyncWrite + Send + 'static {
        let (mut reader, writer) = tokio::io::split(stream);
        let client = Arc::new(RelayClient::new(peer, Box::new(writer)));

        client.log(&self.logger, vec![LogArg::str("server"), LogArg::str("connected")]);

        loop {
            let header =
                match timeout(CLIENT_READ_TIMEOUT, codec::read_header(&mut reader)).await {
                    Ok(Ok(header)) => header,
                    Ok(Err(_)) => break,
                    Err(_) => {
                        client.log(
                            &self.logger,
                            vec![LogArg::str("server"), LogArg::str("Timeout")],
                        );
                        break;
                    },
                };

            let payload_len = header.payload_len.get() as usize;
            let session_id = header.session_id;
            let payload = match timeout(
                CLIENT_READ_TIMEOUT,
                codec::read_payload(&mut reader, payload_len),
            )
            .await
            {
                Ok(Ok(payload)) => payload,
                Ok(Err(_)) | Err(_) => break,
            };

            // The data event carries the session the client was associated
            // with when the frame arrived.
            client.log(
                &self.logger,
                vec![
                    LogArg::str("server"),
                    LogArg::str("data:"),
                    LogArg::blob(payload.clone()),
                ],
            );

            // No data, or no session supplied and none set yet.
            if payload.is_empty() || (session_id == 0 && client.session().is_none()) {
                break;
            }

            let current = client.session();
            if current != Some(session_id) {
                if let Some(old) = current {
                    self.registry.leave(&client, old).await;
                }
                if session_id != 0 {
                    client.set_session(Some(session_id));
                    self.registry.join(&client, session_id).await;
                } else {
                    client.set_session(None);
                }
            }

            let outputs = self.plugins.filter(&self.logger, &client, payload);
            self.registry.publish(session_id, &outputs, &client).await;
        }

        if let Some(session) = client.session() {
            self.registry.leave(&client, session).await;
        }
        client.log(
            &self.logger,
            vec![LogArg::str("server"), LogArg::str("disconnected")],
        );
    }
}
