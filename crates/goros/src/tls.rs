//! TLS acceptor construction and channel-binding export.

use crate::config::TlsSection;
use crate::error::GorosError;
use goro_common::types::{CHANNEL_BINDING_LABEL, CHANNEL_BINDING_SIZE};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Cipher suites offered by the router.
///
/// TLS 1.3 suites are fixed by the protocol; the TLS 1.2 entries are an
/// explicit allow-list of ECDHE + AEAD suites only.
static CIPHER_SUITES: &[rustls::SupportedCipherSuite] = &[
    ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
    ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
    ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
    ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    ring::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

/// Builds the TLS acceptor from the configured certificate and key.
///
/// Session tickets are disabled so a leaked ticket key cannot break the
/// forward secrecy the channel binding relies on.
///
/// # Errors
///
/// Returns [`GorosError`] if the PEM files cannot be read or parsed, or if
/// the rustls configuration is rejected.
pub fn build_tls_acceptor(cfg: &TlsSection) -> Result<TlsAcceptor, GorosError> {
    debug!(cert_file = %cfg.cert_file.display(), key_file = %cfg.key_file.display(), "tls: loading certificates");

    let certs = load_certs(&cfg.cert_file)?;
    let key = load_private_key(&cfg.key_file)?;

    let versions: &[&rustls::SupportedProtocolVersion] = if cfg.min_version == "1.3" {
        &[&rustls::version::TLS13]
    } else {
        &[&rustls::version::TLS12, &rustls::version::TLS13]
    };

    let mut provider = ring::default_provider();
    provider.cipher_suites = CIPHER_SUITES.to_vec();

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.send_tls13_tickets = 0;

    info!(cert_file = %cfg.cert_file.display(), min_version = %cfg.min_version, "tls: certificates loaded");

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, GorosError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(GorosError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("no certificates in {}", path.display()),
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, GorosError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        GorosError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("no private key in {}", path.display()),
        ))
    })
}

/// Exports the RFC 5705 channel-binding value from a completed server-side
/// TLS session.
///
/// # Errors
///
/// Returns [`GorosError::HandshakeIncomplete`] if the handshake has not
/// finished, or [`GorosError::Tls`] if the exporter fails.
pub fn channel_binding(
    conn: &rustls::ServerConnection,
) -> Result<[u8; CHANNEL_BINDING_SIZE], GorosError> {
    if conn.is_handshaking() {
        return Err(GorosError::HandshakeIncomplete);
    }
    let binding =
        conn.export_keying_material([0u8; CHANNEL_BINDING_SIZE], CHANNEL_BINDING_LABEL, None)?;
    Ok(binding)
}
