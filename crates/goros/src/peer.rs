//! Per-connection peer state and the outbound write pump.

use crate::broker::{self, Broker, DeliveryHandler, Publisher, Subscription};
use crate::error::GorosError;
use crate::ratelimit::RateLimiter;
use goro_common::data::encode_server_frame;
use goro_common::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Outbound queue capacity per peer. A peer whose queue overflows is a
/// slow consumer and is evicted.
pub const WRITE_BUFFER_SIZE: usize = 1000;

/// Write deadline for one outbound frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated connection: one identity, one socket, one
/// subscription, one outbound queue.
pub struct Peer {
    id: PeerId,
    pub_key_hex: String,
    publisher: Publisher,
    subscription: Mutex<Option<Subscription>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    limiter: Mutex<RateLimiter>,
    write_timeout: Duration,
}

impl Peer {
    /// Creates a peer and subscribes it to its own subject.
    ///
    /// Returns the peer and the receiving end of its outbound queue, which
    /// the caller hands to [`Peer::write_pump`]. Subscription failure is a
    /// fatal peer error.
    ///
    /// # Errors
    ///
    /// Returns [`GorosError::Broker`] if the subscription cannot be
    /// established.
    pub fn new(
        id: PeerId,
        broker: Arc<dyn Broker>,
        write_buffer_size: usize,
        write_timeout: Duration,
        rate_limit_per_sec: f64,
        rate_limit_burst: u32,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Vec<u8>>), GorosError> {
        let pub_key_hex = hex::encode(id);
        let (write_tx, write_rx) = mpsc::channel(write_buffer_size);
        let (close_tx, _) = watch::channel(false);

        let peer = Arc::new(Self {
            id,
            pub_key_hex: pub_key_hex.clone(),
            publisher: Publisher::new(broker.clone()),
            subscription: Mutex::new(None),
            write_tx,
            closed: AtomicBool::new(false),
            close_tx,
            limiter: Mutex::new(RateLimiter::new(rate_limit_per_sec, rate_limit_burst)),
            write_timeout,
        });

        // The broker holds only a weak reference: a handler firing during
        // teardown must not resurrect the peer.
        let weak = Arc::downgrade(&peer);
        let handler: DeliveryHandler = Arc::new(move |payload: &[u8]| {
            if let Some(peer) = weak.upgrade() {
                peer.handle_delivery(payload);
            }
        });
        let subscription = broker::subscribe_for_peer(&broker, &pub_key_hex, handler)?;
        *peer
            .subscription
            .lock()
            .expect("subscription lock poisoned") = Some(subscription);

        Ok((peer, write_rx))
    }

    /// The peer's 32-byte identity.
    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Hex form of the identity, as used on the wire and in subjects.
    #[must_use]
    pub fn pub_key_hex(&self) -> &str {
        &self.pub_key_hex
    }

    /// The publish handle for this peer's outbound messages.
    #[must_use]
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Spends one rate-limit token. A `false` return disconnects the
    /// client.
    #[must_use]
    pub fn allow_message(&self) -> bool {
        self.limiter.lock().expect("limiter lock poisoned").allow()
    }

    /// Whether close has been initiated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A receiver that resolves once the peer is closing.
    #[must_use]
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Initiates teardown. Idempotent: only the first caller acts.
    ///
    /// Unsubscribes first so no delivery can race socket teardown, then
    /// signals both pumps to exit; the socket closes when the pump halves
    /// drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = self
            .subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.close_tx.send_replace(true);
    }

    /// Broker delivery callback: enqueue or evict.
    fn handle_delivery(&self, payload: &[u8]) {
        if self.is_closed() {
            return;
        }
        match self.write_tx.try_send(payload.to_vec()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Re-check the close flag: a concurrent teardown already
                // explains a full queue.
                if self.is_closed() {
                    return;
                }
                warn!(client = %self.pub_key_hex, "write buffer full, disconnecting slow consumer");
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Drains the outbound queue onto the connection, framing each payload
    /// as a server message. Runs on its own task and owns the write half.
    ///
    /// The write deadline is refreshed only when more than half the write
    /// timeout has elapsed since the last refresh, amortising timer
    /// updates across bursts.
    pub async fn write_pump<W>(self: Arc<Self>, mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut close_rx = self.close_tx.subscribe();
        if self.is_closed() {
            return;
        }

        let mut last_refresh = Instant::now();
        let mut deadline = last_refresh + self.write_timeout;
        loop {
            tokio::select! {
                _ = close_rx.changed() => return,
                data = rx.recv() => {
                    let Some(data) = data else { return };
                    let now = Instant::now();
                    if now - last_refresh > self.write_timeout / 2 {
                        deadline = now + self.write_timeout;
                        last_refresh = now;
                    }
                    if let Err(e) = write_message(&mut writer, &data, deadline).await {
                        if !self.is_closed() {
                            error!(error = %e, client = %self.pub_key_hex, "write message");
                        }
                        self.close();
                        return;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("pub_key_hex", &self.pub_key_hex)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn write_message<W>(writer: &mut W, data: &[u8], deadline: Instant) -> Result<(), GorosError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_server_frame(data)?;
    tokio::time::timeout_at(deadline, async {
        writer.write_all(&frame).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| {
        GorosError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timeout",
        ))
    })??;
    debug!(size = data.len(), "server message written");
    Ok(())
}
