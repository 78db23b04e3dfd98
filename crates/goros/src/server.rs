//! Accept loop, per-connection lifecycle, and the routing read pump.

use crate::auth::authenticate;
use crate::broker::Broker;
use crate::config::Config;
use crate::error::GorosError;
use crate::metrics::{counters, gauges};
use crate::peer::{Peer, WRITE_BUFFER_SIZE, WRITE_TIMEOUT};
use crate::pool::{AuthBuffer, AuthBufferPool, MsgBufferPool};
use crate::registry::PeerRegistry;
use crate::tls::build_tls_acceptor;
use goro_common::crypto::unix_now;
use goro_common::data::{is_valid_hex_pubkey, split_body};
use goro_common::types::MIN_MESSAGE_SIZE;
use goro_common::{Envelope, PeerId, ProtoError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Shared state for the router.
pub struct ServerState {
    /// Identity → peer table.
    pub registry: PeerRegistry,
    /// The pub/sub broker port.
    pub broker: Arc<dyn Broker>,
    /// Validated configuration.
    pub config: Config,
    auth_pool: AuthBufferPool,
    msg_pool: MsgBufferPool,
    acceptor: TlsAcceptor,
    ready_tx: watch::Sender<bool>,
}

impl ServerState {
    /// Builds the TLS acceptor and admission pools from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GorosError`] if the TLS material cannot be loaded.
    pub fn new(config: Config, broker: Arc<dyn Broker>) -> Result<Arc<Self>, GorosError> {
        let acceptor = build_tls_acceptor(&config.tls)?;
        let server_id = config.server.server_id_bytes();
        let auth_pool = AuthBufferPool::new(config.limits.max_connections, &server_id);
        let msg_pool = MsgBufferPool::new(
            config.limits.max_message_size,
            config.limits.max_connections,
        );
        let (ready_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            registry: PeerRegistry::new(),
            broker,
            config,
            auth_pool,
            msg_pool,
            acceptor,
            ready_tx,
        }))
    }

    /// A receiver that resolves once the accept loop is running.
    #[must_use]
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Available admission credits; for observability and tests.
    #[must_use]
    pub fn available_credits(&self) -> usize {
        self.auth_pool.available()
    }
}

/// Binds the configured listener and serves until `shutdown` fires.
///
/// # Errors
///
/// Returns [`GorosError`] on bind failure or a fatal accept-loop error.
pub async fn run(
    config: Config,
    broker: Arc<dyn Broker>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), GorosError> {
    let state = ServerState::new(config, broker)?;
    let listener = TcpListener::bind(state.config.server.addr()).await?;
    serve(listener, state, shutdown).await
}

/// Serves connections from `listener` until `shutdown` fires, then closes
/// the listener, lets in-flight peers finish naturally, and closes the
/// broker.
///
/// # Errors
///
/// Returns [`GorosError`] if the listener address cannot be read.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GorosError> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "router started");
    info!(
        max_connections = state.config.limits.max_connections,
        max_message_size = state.config.limits.max_message_size,
        rate_limit_per_sec = state.config.limits.rate_limit_per_sec,
        rate_limit_burst = state.config.limits.rate_limit_burst,
        auth_timeout_secs = state.config.limits.auth_timeout_secs,
        challenge_ttl_secs = state.config.limits.challenge_ttl_secs,
        "router configuration"
    );
    state.ready_tx.send_replace(true);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => accept_one(stream, addr, &state),
                    Err(e) => error!(error = %e, "accept connection"),
                }
            }
        }
    }

    info!("router shutting down");
    drop(listener);
    state.broker.close();
    Ok(())
}

/// Admission: a connection is accepted only if a credit is free right now.
fn accept_one(stream: TcpStream, addr: SocketAddr, state: &Arc<ServerState>) {
    let Some(mut auth_buf) = state.auth_pool.acquire() else {
        warn!(remote = %addr, "connection limit reached, rejecting");
        counters::connections_rejected_total();
        drop(stream);
        return;
    };
    debug!(remote = %addr, "auth buffer acquired");

    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, addr, &state, &mut auth_buf).await {
            if e.is_disconnect() {
                info!(remote = %addr, "connection closed: {e}");
            } else {
                warn!(remote = %addr, error = %e, "connection failed");
            }
        }
        // The credit returns only after the whole connection lifetime.
        state.auth_pool.release(auth_buf);
    });
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: &Arc<ServerState>,
    auth_buf: &mut AuthBuffer,
) -> Result<(), GorosError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(remote = %addr, error = %e, "set TCP_NODELAY");
    }

    let mut tls_stream = state.acceptor.accept(stream).await?;

    match timeout(
        state.config.limits.auth_timeout(),
        authenticate(
            &mut tls_stream,
            state.config.limits.challenge_ttl(),
            auth_buf,
        ),
    )
    .await
    {
        Ok(Ok(())) => counters::auth_total("ok"),
        Ok(Err(e)) => {
            counters::auth_total("failed");
            if !e.is_disconnect() {
                warn!(remote = %addr, error = %e, "authentication failed");
            }
            return Err(e);
        }
        Err(_) => {
            counters::auth_total("timeout");
            warn!(remote = %addr, "authentication timed out");
            return Err(GorosError::AuthTimeout);
        }
    }

    let id: PeerId = auth_buf.pub_key();
    let (peer, write_rx) = Peer::new(
        id,
        state.broker.clone(),
        WRITE_BUFFER_SIZE,
        WRITE_TIMEOUT,
        state.config.limits.rate_limit_per_sec,
        state.config.limits.rate_limit_burst,
    )
    .inspect_err(|e| error!(remote = %addr, error = %e, "create peer"))?;
    info!(client = %peer.pub_key_hex(), remote = %addr, "client authenticated");

    // Reconnect takeover: the client has proven control of the key, so the
    // newer connection wins and the predecessor is closed.
    if let Some(old) = state.registry.insert(peer.clone()) {
        info!(client = %peer.pub_key_hex(), "closing previous connection");
        old.close();
    }
    gauges::inc_peers_active();

    let (read_half, write_half) = tokio::io::split(tls_stream);
    tokio::spawn(peer.clone().write_pump(write_half, write_rx));

    let result = read_pump(read_half, &peer, state).await;

    state.registry.remove_if_same(&id, &peer);
    peer.close();
    gauges::dec_peers_active();
    info!(client = %peer.pub_key_hex(), "client disconnected");

    result
}

/// Reads and routes client messages until the peer terminates.
async fn read_pump(
    mut reader: tokio::io::ReadHalf<TlsStream<TcpStream>>,
    peer: &Arc<Peer>,
    state: &ServerState,
) -> Result<(), GorosError> {
    let mut close_rx = peer.close_signal();
    loop {
        if peer.is_closed() {
            return Ok(());
        }

        if !peer.allow_message() {
            warn!(client = %peer.pub_key_hex(), "rate limit exceeded, disconnecting");
            counters::messages_dropped_total("rate_limit");
            return Err(GorosError::RateLimited);
        }

        tokio::select! {
            _ = close_rx.changed() => return Ok(()),
            result = handle_message(&mut reader, peer, state) => {
                if let Err(e) = result {
                    if e.is_disconnect() {
                        info!(client = %peer.pub_key_hex(), "peer disconnected");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Reads one client message into a pooled buffer and routes it.
async fn handle_message<R>(
    reader: &mut R,
    peer: &Peer,
    state: &ServerState,
) -> Result<(), GorosError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = state.msg_pool.get();
    let result = read_and_route(reader, peer, &mut buf, state).await;
    state.msg_pool.put(buf);
    result
}

async fn read_and_route<R>(
    reader: &mut R,
    peer: &Peer,
    buf: &mut [u8],
    state: &ServerState,
) -> Result<(), GorosError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(&mut buf[..4]).await?;
    let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    let max = state.config.limits.max_message_size;
    if total_len > max {
        warn!(client = %peer.pub_key_hex(), size = total_len, max, "message too large");
        counters::messages_dropped_total("oversize");
        return Err(ProtoError::FrameTooLarge {
            max,
            actual: total_len,
        }
        .into());
    }
    if total_len < MIN_MESSAGE_SIZE {
        warn!(client = %peer.pub_key_hex(), size = total_len, "message too small");
        return Err(ProtoError::InvalidLength {
            expected: MIN_MESSAGE_SIZE,
            actual: total_len,
        }
        .into());
    }

    reader.read_exact(&mut buf[..total_len]).await?;

    let parts = split_body(&buf[..total_len])?;
    let Ok(to) = std::str::from_utf8(parts.to) else {
        warn!(client = %peer.pub_key_hex(), "invalid recipient");
        counters::messages_dropped_total("bad_recipient");
        return Err(GorosError::InvalidRecipient);
    };
    if !is_valid_hex_pubkey(to) {
        warn!(client = %peer.pub_key_hex(), "invalid recipient");
        counters::messages_dropped_total("bad_recipient");
        return Err(GorosError::InvalidRecipient);
    }

    let envelope = Envelope {
        from: peer.pub_key_hex().to_string(),
        to: to.to_string(),
        id: String::from_utf8_lossy(parts.msg_id).into_owned(),
        payload: parts.payload.to_vec(),
        unix_date_time: i64::try_from(unix_now()?).unwrap_or(i64::MAX),
    };
    let data = envelope.encode()?;

    peer.publisher().publish(to, &data).inspect_err(
        |e| error!(client = %peer.pub_key_hex(), to, error = %e, "publish failed"),
    )?;
    counters::messages_routed_total();
    debug!(client = %peer.pub_key_hex(), to, size = data.len(), "message published");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker};
    use goro_common::data::ClientMessage;
    use goro_common::types::subject_for_peer;
    use std::sync::Mutex;

    fn test_state() -> Arc<ServerState> {
        let mut config = Config::default();
        config.limits.max_message_size = 1024;
        // No TLS needed for read-path tests; build state by hand.
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let (ready_tx, _) = watch::channel(false);
        Arc::new(ServerState {
            registry: PeerRegistry::new(),
            broker: broker.clone(),
            auth_pool: AuthBufferPool::new(4, &[0u8; 32]),
            msg_pool: MsgBufferPool::new(config.limits.max_message_size, 4),
            acceptor: test_acceptor(),
            ready_tx,
            config,
        })
    }

    fn test_acceptor() -> TlsAcceptor {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .unwrap();
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }

    fn test_peer(state: &ServerState, id_byte: u8) -> Arc<Peer> {
        let mut id = [0u8; 32];
        id[0] = id_byte;
        let (peer, _rx) =
            Peer::new(id, state.broker.clone(), 8, WRITE_TIMEOUT, 1000.0, 100).unwrap();
        peer
    }

    fn subscribe_collect(state: &ServerState, hex: &str) -> Arc<Mutex<Vec<Vec<u8>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sub = state
            .broker
            .subscribe(
                &subject_for_peer(hex),
                Arc::new(move |payload: &[u8]| {
                    seen2.lock().unwrap().push(payload.to_vec());
                }),
            )
            .unwrap();
        // Leak the subscription for the test's lifetime.
        std::mem::forget(sub);
        seen
    }

    #[tokio::test]
    async fn valid_message_is_published_as_envelope() {
        let state = test_state();
        let peer = test_peer(&state, 1);
        let to_hex = "cd".repeat(32);
        let seen = subscribe_collect(&state, &to_hex);

        let msg = ClientMessage {
            to: to_hex.clone(),
            msg_id: "msg-1".to_string(),
            payload: b"Hello Bob!".to_vec(),
        };
        let mut wire = std::io::Cursor::new(msg.encode().unwrap());
        handle_message(&mut wire, &peer, &state).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let env = Envelope::decode(&seen[0]).unwrap();
        assert_eq!(env.from, peer.pub_key_hex());
        assert_eq!(env.to, to_hex);
        assert_eq!(env.id, "msg-1");
        assert_eq!(env.payload, b"Hello Bob!");
        assert!(env.unix_date_time > 1_704_067_200);
    }

    #[tokio::test]
    async fn wildcard_recipient_is_rejected_without_publishing() {
        let state = test_state();
        let peer = test_peer(&state, 1);

        // "*" + 63 valid hex chars: correct length, invalid charset.
        let to = format!("*{}", "a".repeat(63));
        let mut body = Vec::new();
        body.extend_from_slice(&66u32.to_be_bytes());
        body.extend_from_slice(to.as_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());

        let mut wire = std::io::Cursor::new(body);
        let err = handle_message(&mut wire, &peer, &state).await.unwrap_err();
        assert!(matches!(err, GorosError::InvalidRecipient));
    }

    #[tokio::test]
    async fn oversize_length_is_rejected_before_body_read() {
        let state = test_state();
        let peer = test_peer(&state, 1);

        // Header only: the body is never sent, and never read.
        let mut wire = std::io::Cursor::new(2048u32.to_be_bytes().to_vec());
        let err = handle_message(&mut wire, &peer, &state).await.unwrap_err();
        assert!(matches!(
            err,
            GorosError::Proto(ProtoError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn undersize_length_is_rejected() {
        let state = test_state();
        let peer = test_peer(&state, 1);

        let mut wire = std::io::Cursor::new(65u32.to_be_bytes().to_vec());
        let err = handle_message(&mut wire, &peer, &state).await.unwrap_err();
        assert!(matches!(
            err,
            GorosError::Proto(ProtoError::InvalidLength { .. })
        ));
    }

    #[tokio::test]
    async fn minimum_message_parses() {
        let state = test_state();
        let peer = test_peer(&state, 1);
        let to_hex = "ef".repeat(32);
        let seen = subscribe_collect(&state, &to_hex);

        let msg = ClientMessage {
            to: to_hex,
            msg_id: String::new(),
            payload: Vec::new(),
        };
        let mut wire = std::io::Cursor::new(msg.encode().unwrap());
        handle_message(&mut wire, &peer, &state).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
