//! Loads a certificate/key pair into a [`tokio_rustls::TlsAcceptor`]
//! (§4.2: "On first I/O under TLS, it completes the handshake, reads the
//! peer certificate...").
//!
//! Grounded on the `spark-transport-tls` acceptor's `ServerConfig` +
//! `TokioTlsAcceptor::from` shape (the Mixer/IVR teacher's own TLS source
//! wasn't retrieved into the pack, only its `tokio-rustls`/`rustls`/
//! `rustls-pemfile` dependency choice, per DESIGN.md).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use anyhow::{Context, Result};

pub fn build_acceptor(certificate: &Path, privatekey: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(certificate)
        .with_context(|| format!("opening certificate {}", certificate.display()))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("parsing certificate {}", certificate.display()))?;

    let key_file = File::open(privatekey)
        .with_context(|| format!("opening private key {}", privatekey.display()))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("parsing private key {}", privatekey.display()))?
        .context("no private key found in file")?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
