// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use tokio_rustls::{TlsAcceptor, rustls};

/// NFCGate relay command line.
///
/// Flag spellings (`--tls_cert`, `--tls_key`) are kept compatible with the
/// deployed tooling.
#[derive(Parser, Debug, Default)]
#[command(name = "nfcgate-relay", about = "Session-multiplexed TCP relay for NFC traffic")]
pub struct Cli {
    /// Plugin names applied, in order, to every inbound payload.
    pub plugins: Vec<String>,

    /// Enable TLS. You must specify certificate and key.
    #[arg(short = 's', long)]
    pub tls: bool,

    /// TLS certificate file in PEM format.
    #[arg(long = "tls_cert")]
    pub tls_cert: Option<PathBuf>,

    /// TLS key file in PEM format.
    #[arg(long = "tls_key")]
    pub tls_key: Option<PathBuf>,
}

impl Cli {
    /// Builds the TLS acceptor when `--tls` is set. Missing or unloadable
    /// certificate material is a startup error.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>> {
        if !self.tls {
            return Ok(None);
        }
        let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) else {
            bail!("--tls requires both --tls_cert and --tls_key");
        };
        load_tls_acceptor(cert, key).map(Some)
    }
}

/// Loads a PEM certificate chain and private key into a server-side
/// acceptor.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("failed to open TLS certificate {}", cert_path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse TLS certificate {}", cert_path.display()))?;
    ensure!(
        !certs.is_empty(),
        "no certificates found in {}",
        cert_path.display()
    );

    let key_file = File::open(key_path)
        .with_context(|| format!("failed to open TLS key {}", key_path.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("failed to parse TLS key {}", key_path.display()))?
        .with_context(|| format!("no private key found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate or key could not be loaded")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
