//! Core type definitions and protocol constants for goro.

/// A 32-byte ed25519 public key used as a peer identity.
pub type PeerId = [u8; 32];

/// Protocol version literal mixed into every signature.
/// Bump this on breaking changes to the signing input.
pub const PROTOCOL_VERSION: &str = "goro-auth-v1";

/// RFC 5705 exporter label for TLS channel binding.
/// Part of the wire protocol; must match on both ends.
pub const CHANNEL_BINDING_LABEL: &[u8] = b"EXPORTER-goro-auth-v1";

/// Namespace prefix for broker subjects (`goro.msg.<hex-pubkey>`).
pub const SUBJECT_NAMESPACE: &str = "goro";

/// Size of an ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of the server-issued random challenge in bytes.
pub const CHALLENGE_SIZE: usize = 32;
/// Size of the big-endian Unix timestamp in bytes.
pub const TIMESTAMP_SIZE: usize = 8;
/// Size of the server identifier field in bytes.
pub const SERVER_ID_SIZE: usize = 32;
/// Size of an ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;
/// Size of the TLS channel-binding value in bytes.
pub const CHANNEL_BINDING_SIZE: usize = 32;

/// Size of the signing input:
/// version literal + challenge + timestamp + server id + pubkey + binding.
pub const SIGNED_DATA_SIZE: usize = PROTOCOL_VERSION.len()
    + CHALLENGE_SIZE
    + TIMESTAMP_SIZE
    + SERVER_ID_SIZE
    + PUBLIC_KEY_SIZE
    + CHANNEL_BINDING_SIZE;

/// Maximum total length of a data-phase message body (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 65536;
/// Maximum length of a client-supplied message id.
pub const MAX_MSG_ID_LEN: usize = 256;
/// Maximum length of the error message carried in an auth result.
pub const MAX_ERROR_MSG_LEN: usize = 1024;

/// Minimum data-phase body length: To (64 hex chars) + MsgIdLen (2 bytes).
pub const MIN_MESSAGE_SIZE: usize = PUBLIC_KEY_SIZE * 2 + 2;

/// Maximum length of a serialized envelope (router → client frame body).
///
/// A serialized envelope carries a fixed 102 bytes of record framing beyond
/// the client message body it wraps; the headroom above
/// [`MAX_MESSAGE_SIZE`] covers it.
pub const MAX_ENVELOPE_SIZE: usize = MAX_MESSAGE_SIZE + 128;

/// Handshake frame type tags.
pub mod frame_type {
    /// Client → server: hello with public key.
    pub const CLIENT_HELLO: u8 = 0x01;
    /// Server → client: challenge + timestamp + server id.
    pub const SERVER_CHALLENGE: u8 = 0x02;
    /// Client → server: signature over the channel-bound signing input.
    pub const CLIENT_RESPONSE: u8 = 0x03;
    /// Server → client: authentication verdict.
    pub const AUTH_RESULT: u8 = 0x04;
}

/// Status codes carried in an auth result frame.
pub mod auth_status {
    /// Authentication succeeded.
    pub const OK: u8 = 0x00;
    /// Signature verification failed.
    pub const INVALID_SIG: u8 = 0x02;
    /// Challenge timestamp outside the accepted window.
    pub const REPLAY: u8 = 0x03;
}

/// Returns the broker subject addressed to the given hex-encoded peer key.
///
/// The hex component must be validated with
/// [`crate::data::is_valid_hex_pubkey`] before assembly; this function never
/// receives unvalidated input on the server hot path.
#[must_use]
pub fn subject_for_peer(pub_key_hex: &str) -> String {
    let mut s = String::with_capacity(SUBJECT_NAMESPACE.len() + 5 + pub_key_hex.len());
    s.push_str(SUBJECT_NAMESPACE);
    s.push_str(".msg.");
    s.push_str(pub_key_hex);
    s
}
