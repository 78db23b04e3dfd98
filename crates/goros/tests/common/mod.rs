//! Test environment: a router on a random port with a self-signed
//! certificate and the in-process broker, plus client helpers.

#![allow(dead_code)]

use goro_common::{Envelope, KeyPair};
use goroc::{ClientOptions, GorocError, OutgoingMessage};
use goros::broker::{Broker, MemoryBroker};
use goros::config::Config;
use goros::{serve, ServerState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

pub struct TestEnv {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub broker: MemoryBroker,
    shutdown_tx: watch::Sender<bool>,
    _certs_dir: tempfile::TempDir,
}

pub async fn start_env() -> TestEnv {
    start_env_with(|_| {}).await
}

pub async fn start_env_with(adjust: impl FnOnce(&mut Config)) -> TestEnv {
    let certs_dir = tempfile::tempdir().unwrap();
    let (cert_path, key_path) = write_self_signed(certs_dir.path());

    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.server_id = "test-goro".to_string();
    config.tls.cert_file = cert_path;
    config.tls.key_file = key_path;
    config.limits.max_connections = 100;
    config.limits.rate_limit_per_sec = 1000.0;
    config.limits.rate_limit_burst = 100;
    adjust(&mut config);
    config.validate().expect("test config must be valid");

    let broker = MemoryBroker::new();
    let dyn_broker: Arc<dyn Broker> = Arc::new(broker.clone());
    let state = ServerState::new(config, dyn_broker).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut ready = state.ready_signal();
    tokio::spawn(serve(listener, state.clone(), shutdown_rx));
    ready.wait_for(|r| *r).await.unwrap();

    TestEnv {
        addr,
        state,
        broker,
        shutdown_tx,
        _certs_dir: certs_dir,
    }
}

impl TestEnv {
    /// Connects an authenticated client with the given identity.
    pub async fn new_client(
        &self,
        keys: &KeyPair,
    ) -> (mpsc::Sender<OutgoingMessage>, mpsc::Receiver<Envelope>) {
        self.try_client(keys).await.expect("client should connect")
    }

    pub async fn try_client(
        &self,
        keys: &KeyPair,
    ) -> Result<(mpsc::Sender<OutgoingMessage>, mpsc::Receiver<Envelope>), GorocError> {
        self.try_client_with(keys, |opts| opts).await
    }

    pub async fn try_client_with(
        &self,
        keys: &KeyPair,
        adjust: impl FnOnce(ClientOptions) -> ClientOptions,
    ) -> Result<(mpsc::Sender<OutgoingMessage>, mpsc::Receiver<Envelope>), GorocError> {
        let (send_tx, send_rx) = mpsc::channel(16);
        let options = adjust(
            ClientOptions::new()
                .with_keys(keys.clone())
                .with_insecure_skip_verify()
                .with_dial_timeout(Duration::from_secs(10)),
        );
        let inbox = goroc::connect(&self.addr.to_string(), send_rx, options).await?;
        Ok((send_tx, inbox))
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

pub async fn send_msg(
    send: &mpsc::Sender<OutgoingMessage>,
    to: &str,
    msg_id: &str,
    payload: &[u8],
) {
    send.send(OutgoingMessage {
        to: to.to_string(),
        msg_id: msg_id.to_string(),
        payload: payload.to_vec(),
    })
    .await
    .expect("outbox should accept message");
}

pub async fn recv_within(inbox: &mut mpsc::Receiver<Envelope>, secs: u64) -> Envelope {
    tokio::time::timeout(Duration::from_secs(secs), inbox.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("inbox closed while waiting for envelope")
}

/// Waits until `predicate` holds or panics after ten seconds.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn write_self_signed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.cert.pem()).unwrap();
    std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

// ── Raw protocol client ─────────────────────────────────────────────────
//
// Drives the wire protocol by hand for tests that must misbehave in ways
// the SDK refuses to.

pub struct RawClient {
    pub stream: tokio_rustls::client::TlsStream<TcpStream>,
}

impl RawClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let stream = connector.connect(server_name, tcp).await.unwrap();
        Self { stream }
    }

    /// Reads the server challenge after sending a hello for `keys`.
    pub async fn hello(&mut self, keys: &KeyPair) -> goro_common::frame::ServerChallenge {
        use goro_common::frame::{ClientHello, ServerChallenge};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let hello = ClientHello {
            pub_key: keys.public_key_bytes(),
        };
        self.stream.write_all(&hello.encode()).await.unwrap();
        self.stream.flush().await.unwrap();

        let mut buf = [0u8; ServerChallenge::ENCODED_LEN];
        self.stream.read_exact(&mut buf).await.unwrap();
        ServerChallenge::decode(&buf).unwrap()
    }

    /// Sends a client response carrying `signature` and returns the
    /// server's auth result.
    pub async fn respond(&mut self, signature: [u8; 64]) -> goro_common::frame::AuthResult {
        use goro_common::frame::{AuthResult, ClientResponse};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        self.stream
            .write_all(&ClientResponse { signature }.encode())
            .await
            .unwrap();
        self.stream.flush().await.unwrap();

        let mut head = [0u8; 2];
        self.stream.read_exact(&mut head).await.unwrap();
        if head[1] == goro_common::types::auth_status::OK {
            return AuthResult::ok();
        }
        let mut len_buf = [0u8; 2];
        self.stream.read_exact(&mut len_buf).await.unwrap();
        let mut msg = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        self.stream.read_exact(&mut msg).await.unwrap();
        AuthResult::failure(head[1], String::from_utf8_lossy(&msg).into_owned())
    }

    /// The correctly signed, channel-bound response for `challenge`.
    pub fn sign(&self, keys: &KeyPair, challenge: &goro_common::frame::ServerChallenge) -> [u8; 64] {
        let (_, conn) = self.stream.get_ref();
        let binding: [u8; 32] = conn
            .export_keying_material(
                [0u8; 32],
                goro_common::types::CHANNEL_BINDING_LABEL,
                None,
            )
            .unwrap();
        goro_common::crypto::sign_challenge(
            keys.signing_key(),
            &challenge.challenge,
            challenge.timestamp,
            &challenge.server_id,
            &binding,
        )
    }
}

#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}
