use goro_common::ProtoError;
use thiserror::Error;

/// Errors that can occur in the client SDK.
#[derive(Error, Debug)]
pub enum GorocError {
    /// Wire codec failure.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    /// The server rejected the handshake.
    #[error("authentication failed (status {status:#04x}): {message}")]
    AuthFailed {
        /// Status code from the auth result frame.
        status: u8,
        /// Server-supplied failure reason.
        message: String,
    },
    /// Channel binding was requested before the TLS handshake finished.
    #[error("TLS handshake not complete")]
    HandshakeIncomplete,
    /// TLS layer failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// The server address or SNI name could not be parsed.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    /// A dial or handshake deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// Envelope deserialization failure.
    #[error("envelope decode error: {0}")]
    Envelope(#[from] bincode::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}
