//! goro client SDK.
//!
//! Dials a goro router over TLS, proves control of an ed25519 key through
//! the channel-bound handshake, and exposes the connection as a pair of
//! channels: an outbox of addressed messages and an inbox of received
//! envelopes. Closing the outbox tears down the connection; the inbox
//! closing signals that the connection ended.
//!
//! ```no_run
//! # async fn example() -> Result<(), goroc::GorocError> {
//! use goro_common::KeyPair;
//! use goroc::{connect, ClientOptions, OutgoingMessage};
//! use tokio::sync::mpsc;
//!
//! let keys = KeyPair::generate();
//! let (send, outbox) = mpsc::channel(10);
//! let mut inbox = connect(
//!     "127.0.0.1:8443",
//!     outbox,
//!     ClientOptions::new().with_keys(keys).with_ca_cert("ca.pem"),
//! )
//! .await?;
//!
//! send.send(OutgoingMessage {
//!     to: "ab".repeat(32),
//!     msg_id: "msg-1".into(),
//!     payload: b"Hello Bob!".to_vec(),
//! })
//! .await
//! .ok();
//!
//! if let Some(envelope) = inbox.recv().await {
//!     println!("{} says: {:?}", envelope.from, envelope.payload);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
/// Error types for client operations.
pub mod error;
/// Connection options builder.
pub mod options;
mod tls;

pub use error::GorocError;
pub use goro_common::Envelope;
pub use options::ClientOptions;

use goro_common::data::ClientMessage;
use goro_common::types::MAX_ENVELOPE_SIZE;
use goro_common::KeyPair;
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

/// A message to send through the router.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Recipient's hex-encoded public key (64 characters).
    pub to: String,
    /// Client-chosen message identifier (at most 256 bytes).
    pub msg_id: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// Connects to a router and runs the connection until the outbox closes
/// or the transport fails.
///
/// Messages pushed into `outbox` are framed and sent; envelopes delivered
/// to this identity arrive on the returned inbox. Both pumps share one
/// close latch, so either side failing tears the whole connection down.
///
/// # Errors
///
/// Returns [`GorocError`] if dialing, TLS, or the handshake fails.
pub async fn connect(
    addr: &str,
    outbox: mpsc::Receiver<OutgoingMessage>,
    options: ClientOptions,
) -> Result<mpsc::Receiver<Envelope>, GorocError> {
    let keys = options.keys.clone().unwrap_or_else(KeyPair::generate);

    let host = options
        .server_name
        .clone()
        .or_else(|| addr.rsplit_once(':').map(|(h, _)| h.to_string()))
        .ok_or_else(|| GorocError::InvalidServerName(addr.to_string()))?;
    let server_name = ServerName::try_from(host.clone())
        .map_err(|_| GorocError::InvalidServerName(host))?;

    let connector = tls::build_connector(&options)?;

    let mut stream = timeout(options.dial_timeout, async {
        let tcp = TcpStream::connect(addr).await?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(GorocError::Io)
    })
    .await
    .map_err(|_| GorocError::Timeout)??;

    timeout(options.dial_timeout, auth::authenticate(&mut stream, &keys))
        .await
        .map_err(|_| GorocError::Timeout)??;
    debug!(client = %keys.public_key_hex(), "authenticated");

    let (inbox_tx, inbox_rx) = mpsc::channel(options.read_buffer);
    tokio::spawn(run_loop(stream, outbox, inbox_tx, options.write_timeout));

    Ok(inbox_rx)
}

/// Shared close-once latch for the two pumps.
#[derive(Clone)]
struct CloseOnce {
    closed: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl CloseOnce {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.tx.send_replace(true);
        }
    }

    fn signal(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

async fn run_loop(
    stream: tokio_rustls::client::TlsStream<TcpStream>,
    outbox: mpsc::Receiver<OutgoingMessage>,
    inbox: mpsc::Sender<Envelope>,
    write_timeout: Duration,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let close = CloseOnce::new();

    tokio::join!(
        read_pump(read_half, inbox, close.clone()),
        write_pump(write_half, outbox, close, write_timeout),
    );
    // Both halves dropped here; the socket closes and the inbox sender is
    // gone, which closes the receiver the caller holds.
}

async fn read_pump<R>(mut reader: R, inbox: mpsc::Sender<Envelope>, close: CloseOnce)
where
    R: AsyncRead + Unpin,
{
    let mut close_rx = close.signal();
    loop {
        let data = tokio::select! {
            _ = close_rx.changed() => return,
            result = read_frame(&mut reader) => match result {
                Ok(data) => data,
                Err(e) => {
                    if !close.closed.load(Ordering::SeqCst) {
                        debug!(error = %e, "read pump ending");
                    }
                    close.close();
                    return;
                }
            },
        };

        // A malformed envelope is logged and skipped, not fatal.
        match Envelope::decode(&data) {
            Ok(envelope) => {
                tokio::select! {
                    result = inbox.send(envelope) => {
                        if result.is_err() {
                            close.close();
                            return;
                        }
                    }
                    _ = close_rx.changed() => return,
                }
            }
            Err(e) => warn!(error = %e, "malformed envelope"),
        }
    }
}

async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, GorocError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_ENVELOPE_SIZE {
        return Err(goro_common::ProtoError::FrameTooLarge {
            max: MAX_ENVELOPE_SIZE,
            actual: len,
        }
        .into());
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

async fn write_pump<W>(
    mut writer: W,
    mut outbox: mpsc::Receiver<OutgoingMessage>,
    close: CloseOnce,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut close_rx = close.signal();
    loop {
        let msg = tokio::select! {
            _ = close_rx.changed() => return,
            msg = outbox.recv() => match msg {
                Some(msg) => msg,
                // The caller closed the outbox: tear down the connection.
                None => {
                    close.close();
                    return;
                }
            },
        };

        let frame = match (ClientMessage {
            to: msg.to,
            msg_id: msg.msg_id,
            payload: msg.payload,
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                // An unsendable message is the caller's bug; skip it.
                warn!(error = %e, "dropping unencodable message");
                continue;
            }
        };

        let written = timeout(write_timeout, async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !close.closed.load(Ordering::SeqCst) {
                    debug!(error = %e, "write pump ending");
                }
                close.close();
                return;
            }
            Err(_) => {
                warn!("write timed out");
                close.close();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goro_common::data::encode_server_frame;

    #[tokio::test]
    async fn read_frame_round_trips() {
        let payload = b"envelope bytes".to_vec();
        let framed = encode_server_frame(&payload).unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn read_frame_rejects_oversize_length() {
        let mut framed = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        framed.extend_from_slice(&((MAX_ENVELOPE_SIZE + 1) as u32).to_be_bytes());
        let mut cursor = std::io::Cursor::new(framed);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(GorocError::Proto(_))
        ));
    }

    #[tokio::test]
    async fn close_once_fires_exactly_once() {
        let close = CloseOnce::new();
        let mut rx = close.signal();
        close.close();
        close.close();
        assert!(rx.changed().await.is_ok());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn write_pump_frames_outgoing_messages() {
        let (tx, rx) = mpsc::channel(4);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let close = CloseOnce::new();

        let pump = tokio::spawn(write_pump(
            server,
            rx,
            close.clone(),
            Duration::from_secs(5),
        ));

        tx.send(OutgoingMessage {
            to: "ab".repeat(32),
            msg_id: "m1".into(),
            payload: b"hi".to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        client.read_exact(&mut body).await.unwrap();

        let parsed = ClientMessage::decode_body(&body).unwrap();
        assert_eq!(parsed.to, "ab".repeat(32));
        assert_eq!(parsed.msg_id, "m1");
        assert_eq!(parsed.payload, b"hi");

        // Closing the outbox ends the pump.
        pump.await.unwrap();
        assert!(close.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn write_pump_skips_unencodable_message() {
        let (tx, rx) = mpsc::channel(4);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let close = CloseOnce::new();

        let pump = tokio::spawn(write_pump(
            server,
            rx,
            close.clone(),
            Duration::from_secs(5),
        ));

        // Recipient of the wrong length cannot be framed.
        tx.send(OutgoingMessage {
            to: "short".into(),
            msg_id: String::new(),
            payload: Vec::new(),
        })
        .await
        .unwrap();
        tx.send(OutgoingMessage {
            to: "cd".repeat(32),
            msg_id: String::new(),
            payload: b"ok".to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        client.read_exact(&mut body).await.unwrap();
        let parsed = ClientMessage::decode_body(&body).unwrap();
        assert_eq!(parsed.to, "cd".repeat(32));

        pump.await.unwrap();
    }
}
