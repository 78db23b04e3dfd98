use goro_common::ProtoError;
use thiserror::Error;

/// Errors that can occur during router operation.
#[derive(Error, Debug)]
pub enum GorosError {
    /// Wire codec failure: malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    /// ed25519 signature verification failed during the handshake.
    #[error("invalid signature")]
    InvalidSignature,
    /// The challenge timestamp is older than the configured TTL.
    #[error("challenge expired: age {age_secs}s")]
    ChallengeExpired {
        /// Observed challenge age in seconds.
        age_secs: u64,
    },
    /// The challenge timestamp is too far in the future.
    #[error("timestamp in future: {ahead_secs}s ahead")]
    TimestampInFuture {
        /// How far ahead of the server clock the timestamp is.
        ahead_secs: u64,
    },
    /// The whole-handshake deadline elapsed.
    #[error("authentication timed out")]
    AuthTimeout,
    /// Channel binding was requested before the TLS handshake finished.
    #[error("TLS handshake not complete")]
    HandshakeIncomplete,
    /// TLS layer failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// The client sent a recipient that is not a 64-char hex key.
    #[error("invalid recipient pubkey format")]
    InvalidRecipient,
    /// The per-peer rate limit was exceeded.
    #[error("rate limit exceeded")]
    RateLimited,
    /// Broker publish or subscribe failure.
    #[error("broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),
    /// Envelope serialization failure.
    #[error("envelope encode error: {0}")]
    Envelope(#[from] bincode::Error),
    /// System clock is before the Unix epoch.
    #[error(transparent)]
    Clock(#[from] goro_common::ClockError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}

impl GorosError {
    /// Returns `true` for errors that mean the peer simply went away,
    /// logged at info level rather than as failures.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
