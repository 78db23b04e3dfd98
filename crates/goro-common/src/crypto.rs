//! Channel-bound signing input and ed25519 helpers for the handshake.
//!
//! The signing input ties together the server challenge, the server
//! identity, the client key, and the TLS session (via the RFC 5705
//! exporter value), prefixed with the protocol version literal to prevent
//! cross-protocol signature reuse.

use crate::types::{
    CHALLENGE_SIZE, CHANNEL_BINDING_SIZE, PROTOCOL_VERSION, PUBLIC_KEY_SIZE, SERVER_ID_SIZE,
    SIGNED_DATA_SIZE, TIMESTAMP_SIZE,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// Error returned when the system clock is before the Unix epoch.
#[derive(Debug, Clone, Copy)]
pub struct ClockError;

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system clock is before Unix epoch")
    }
}

impl std::error::Error for ClockError {}

/// Writes the signing input into a caller-supplied buffer without
/// allocating.
///
/// Layout, in order: protocol version literal (no terminator), challenge,
/// big-endian timestamp, server id, client public key, channel binding.
/// The result is always exactly [`SIGNED_DATA_SIZE`] (148) bytes.
pub fn build_signed_data_to(
    buf: &mut [u8; SIGNED_DATA_SIZE],
    challenge: &[u8; CHALLENGE_SIZE],
    timestamp: u64,
    server_id: &[u8; SERVER_ID_SIZE],
    client_pub_key: &[u8; PUBLIC_KEY_SIZE],
    channel_binding: &[u8; CHANNEL_BINDING_SIZE],
) {
    let mut off = 0;
    buf[off..off + PROTOCOL_VERSION.len()].copy_from_slice(PROTOCOL_VERSION.as_bytes());
    off += PROTOCOL_VERSION.len();
    buf[off..off + CHALLENGE_SIZE].copy_from_slice(challenge);
    off += CHALLENGE_SIZE;
    buf[off..off + TIMESTAMP_SIZE].copy_from_slice(&timestamp.to_be_bytes());
    off += TIMESTAMP_SIZE;
    buf[off..off + SERVER_ID_SIZE].copy_from_slice(server_id);
    off += SERVER_ID_SIZE;
    buf[off..off + PUBLIC_KEY_SIZE].copy_from_slice(client_pub_key);
    off += PUBLIC_KEY_SIZE;
    buf[off..off + CHANNEL_BINDING_SIZE].copy_from_slice(channel_binding);
}

/// Builds the signing input on the stack and returns it by value.
#[must_use]
pub fn build_signed_data(
    challenge: &[u8; CHALLENGE_SIZE],
    timestamp: u64,
    server_id: &[u8; SERVER_ID_SIZE],
    client_pub_key: &[u8; PUBLIC_KEY_SIZE],
    channel_binding: &[u8; CHANNEL_BINDING_SIZE],
) -> [u8; SIGNED_DATA_SIZE] {
    let mut buf = [0u8; SIGNED_DATA_SIZE];
    build_signed_data_to(
        &mut buf,
        challenge,
        timestamp,
        server_id,
        client_pub_key,
        channel_binding,
    );
    buf
}

/// Signs the channel-bound challenge input with the client key.
///
/// Returns the raw 64-byte signature.
#[must_use]
pub fn sign_challenge(
    signing_key: &SigningKey,
    challenge: &[u8; CHALLENGE_SIZE],
    timestamp: u64,
    server_id: &[u8; SERVER_ID_SIZE],
    channel_binding: &[u8; CHANNEL_BINDING_SIZE],
) -> [u8; 64] {
    let pub_key = signing_key.verifying_key().to_bytes();
    let msg = build_signed_data(challenge, timestamp, server_id, &pub_key, channel_binding);
    signing_key.sign(&msg).to_bytes()
}

/// Verifies a challenge signature against the reconstructed signing input.
#[must_use]
pub fn verify_challenge(
    verifying_key: &VerifyingKey,
    challenge: &[u8; CHALLENGE_SIZE],
    timestamp: u64,
    server_id: &[u8; SERVER_ID_SIZE],
    channel_binding: &[u8; CHANNEL_BINDING_SIZE],
    signature: &[u8; 64],
) -> bool {
    let pub_key = verifying_key.to_bytes();
    let msg = build_signed_data(challenge, timestamp, server_id, &pub_key, channel_binding);
    let sig = Signature::from_bytes(signature);
    verifying_key.verify(&msg, &sig).is_ok()
}

/// Returns the current Unix timestamp in seconds.
///
/// # Errors
///
/// Returns [`ClockError`] if the system clock is before the Unix epoch.
/// Callers must handle this explicitly rather than substituting a fallback.
pub fn unix_now() -> Result<u64, ClockError> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| ClockError)
}
