//! Authentication handshake frames.
//!
//! Each handshake frame starts with a 1-byte type tag followed by
//! fixed-size fields. Decoders are strict: a length mismatch or an
//! unexpected tag fails the frame.

use crate::types::{
    auth_status, frame_type, CHALLENGE_SIZE, MAX_ERROR_MSG_LEN, PUBLIC_KEY_SIZE, SERVER_ID_SIZE,
    SIGNATURE_SIZE, TIMESTAMP_SIZE,
};
use thiserror::Error;

/// Errors produced by the wire codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// The input has the wrong length for the declared frame.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The type tag does not match the expected frame.
    #[error("unexpected message type: {0:#04x}")]
    UnexpectedType(u8),
    /// A declared length exceeds its protocol maximum.
    #[error("frame too large: max {max}, got {actual}")]
    FrameTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Declared size.
        actual: usize,
    },
}

fn expect_len(data: &[u8], expected: usize) -> Result<(), ProtoError> {
    if data.len() != expected {
        return Err(ProtoError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn expect_tag(data: &[u8], tag: u8) -> Result<(), ProtoError> {
    match data.first() {
        Some(&t) if t == tag => Ok(()),
        Some(&t) => Err(ProtoError::UnexpectedType(t)),
        None => Err(ProtoError::InvalidLength {
            expected: 1,
            actual: 0,
        }),
    }
}

fn array_at<const N: usize>(data: &[u8], start: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[start..start + N]);
    out
}

/// First handshake message: the client announces its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Client's ed25519 public key.
    pub pub_key: [u8; PUBLIC_KEY_SIZE],
}

impl ClientHello {
    /// Encoded size on the wire, tag included.
    pub const ENCODED_LEN: usize = 1 + PUBLIC_KEY_SIZE;

    /// Serializes this frame, tag byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(Self::ENCODED_LEN);
        v.push(frame_type::CLIENT_HELLO);
        v.extend_from_slice(&self.pub_key);
        v
    }

    /// Parses an encoded frame, tag byte included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a wrong tag or length.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        expect_tag(data, frame_type::CLIENT_HELLO)?;
        expect_len(data, Self::ENCODED_LEN)?;
        Ok(Self {
            pub_key: array_at(data, 1),
        })
    }
}

/// Second handshake message: the server's challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChallenge {
    /// Freshly generated random challenge.
    pub challenge: [u8; CHALLENGE_SIZE],
    /// Server Unix timestamp in seconds.
    pub timestamp: u64,
    /// Server identifier, zero-padded to 32 bytes.
    pub server_id: [u8; SERVER_ID_SIZE],
}

impl ServerChallenge {
    /// Encoded size on the wire, tag included.
    pub const ENCODED_LEN: usize = 1 + CHALLENGE_SIZE + TIMESTAMP_SIZE + SERVER_ID_SIZE;

    /// Serializes this frame, tag byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(Self::ENCODED_LEN);
        v.push(frame_type::SERVER_CHALLENGE);
        v.extend_from_slice(&self.challenge);
        v.extend_from_slice(&self.timestamp.to_be_bytes());
        v.extend_from_slice(&self.server_id);
        v
    }

    /// Parses an encoded frame, tag byte included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a wrong tag or length.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        expect_tag(data, frame_type::SERVER_CHALLENGE)?;
        expect_len(data, Self::ENCODED_LEN)?;
        let ts: [u8; TIMESTAMP_SIZE] = array_at(data, 1 + CHALLENGE_SIZE);
        Ok(Self {
            challenge: array_at(data, 1),
            timestamp: u64::from_be_bytes(ts),
            server_id: array_at(data, 1 + CHALLENGE_SIZE + TIMESTAMP_SIZE),
        })
    }
}

/// Third handshake message: the client's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    /// ed25519 signature over the channel-bound signing input.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl ClientResponse {
    /// Encoded size on the wire, tag included.
    pub const ENCODED_LEN: usize = 1 + SIGNATURE_SIZE;

    /// Serializes this frame, tag byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(Self::ENCODED_LEN);
        v.push(frame_type::CLIENT_RESPONSE);
        v.extend_from_slice(&self.signature);
        v
    }

    /// Parses an encoded frame, tag byte included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a wrong tag or length.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        expect_tag(data, frame_type::CLIENT_RESPONSE)?;
        expect_len(data, Self::ENCODED_LEN)?;
        Ok(Self {
            signature: array_at(data, 1),
        })
    }
}

/// Final handshake message: the server's verdict.
///
/// A non-OK status carries a length-prefixed error message; an OK result
/// is exactly two bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    /// One of the [`auth_status`] codes.
    pub status: u8,
    /// Human-readable failure reason; empty when status is OK.
    pub error_msg: String,
}

impl AuthResult {
    /// Creates a successful result.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: auth_status::OK,
            error_msg: String::new(),
        }
    }

    /// Creates a failed result with the given status and reason.
    #[must_use]
    pub fn failure(status: u8, error_msg: impl Into<String>) -> Self {
        Self {
            status,
            error_msg: error_msg.into(),
        }
    }

    /// Serializes this frame, tag byte first. The error message is
    /// truncated to [`MAX_ERROR_MSG_LEN`] bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(2);
        v.push(frame_type::AUTH_RESULT);
        v.push(self.status);
        if self.status != auth_status::OK {
            let msg = self.error_msg.as_bytes();
            let msg = &msg[..msg.len().min(MAX_ERROR_MSG_LEN)];
            #[allow(clippy::cast_possible_truncation)]
            v.extend_from_slice(&(msg.len() as u16).to_be_bytes());
            v.extend_from_slice(msg);
        }
        v
    }

    /// Parses an encoded frame, tag byte included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a wrong tag, a truncated message, or an
    /// error length beyond [`MAX_ERROR_MSG_LEN`].
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        expect_tag(data, frame_type::AUTH_RESULT)?;
        if data.len() < 2 {
            return Err(ProtoError::InvalidLength {
                expected: 2,
                actual: data.len(),
            });
        }
        let status = data[1];
        if status == auth_status::OK {
            expect_len(data, 2)?;
            return Ok(Self::ok());
        }
        if data.len() < 4 {
            return Err(ProtoError::InvalidLength {
                expected: 4,
                actual: data.len(),
            });
        }
        let err_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if err_len > MAX_ERROR_MSG_LEN {
            return Err(ProtoError::FrameTooLarge {
                max: MAX_ERROR_MSG_LEN,
                actual: err_len,
            });
        }
        expect_len(data, 4 + err_len)?;
        let error_msg = String::from_utf8_lossy(&data[4..4 + err_len]).into_owned();
        Ok(Self { status, error_msg })
    }
}
