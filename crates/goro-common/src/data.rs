//! Data-phase framing: the addressed client message and the opaque
//! server message, both prefixed with a big-endian u32 length.

use crate::frame::ProtoError;
use crate::types::{
    MAX_ENVELOPE_SIZE, MAX_MESSAGE_SIZE, MAX_MSG_ID_LEN, MIN_MESSAGE_SIZE, PUBLIC_KEY_SIZE,
};

/// Hex length of a public key on the wire.
const TO_LEN: usize = PUBLIC_KEY_SIZE * 2;

/// Returns `true` if `s` is a valid hex-encoded public key: exactly
/// 64 characters, each in `[0-9a-fA-F]`.
///
/// This is the pub/sub subject-injection defense: wildcard and separator
/// characters (`*`, `>`, `.`, whitespace) can never reach a subject
/// template. Allocation-free.
#[must_use]
pub fn is_valid_hex_pubkey(s: &str) -> bool {
    if s.len() != TO_LEN {
        return false;
    }
    s.bytes().all(|c| c.is_ascii_hexdigit())
}

/// A message from a client to the router, addressed by recipient key.
///
/// Wire form: `Len(4, be) | To(64 hex) | MsgIdLen(2, be) | MsgId | Payload`,
/// where `Len` counts everything after itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// Hex-encoded recipient public key (64 characters).
    pub to: String,
    /// Client-chosen message identifier (at most 256 bytes).
    pub msg_id: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl ClientMessage {
    /// Serializes the message, length prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] if the recipient is not 64 bytes, the message
    /// id exceeds [`MAX_MSG_ID_LEN`], or the total exceeds
    /// [`MAX_MESSAGE_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        if self.to.len() != TO_LEN {
            return Err(ProtoError::InvalidLength {
                expected: TO_LEN,
                actual: self.to.len(),
            });
        }
        if self.msg_id.len() > MAX_MSG_ID_LEN {
            return Err(ProtoError::FrameTooLarge {
                max: MAX_MSG_ID_LEN,
                actual: self.msg_id.len(),
            });
        }
        let total = TO_LEN + 2 + self.msg_id.len() + self.payload.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(ProtoError::FrameTooLarge {
                max: MAX_MESSAGE_SIZE,
                actual: total,
            });
        }

        let mut v = Vec::with_capacity(4 + total);
        #[allow(clippy::cast_possible_truncation)]
        v.extend_from_slice(&(total as u32).to_be_bytes());
        v.extend_from_slice(self.to.as_bytes());
        #[allow(clippy::cast_possible_truncation)]
        v.extend_from_slice(&(self.msg_id.len() as u16).to_be_bytes());
        v.extend_from_slice(self.msg_id.as_bytes());
        v.extend_from_slice(&self.payload);
        Ok(v)
    }

    /// Parses a message body: everything after the 4-byte length prefix.
    ///
    /// The recipient field is taken verbatim; callers on the routing path
    /// must validate it with [`is_valid_hex_pubkey`] before building a
    /// broker subject.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] if the body is shorter than
    /// [`MIN_MESSAGE_SIZE`], the message id length exceeds
    /// [`MAX_MSG_ID_LEN`], or the declared message id overruns the body.
    pub fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let parts = split_body(body)?;
        Ok(Self {
            to: String::from_utf8_lossy(parts.to).into_owned(),
            msg_id: String::from_utf8_lossy(parts.msg_id).into_owned(),
            payload: parts.payload.to_vec(),
        })
    }

    /// Parses a complete encoded message, length prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a bad prefix or body.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < 4 {
            return Err(ProtoError::InvalidLength {
                expected: 4,
                actual: data.len(),
            });
        }
        let total = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if total > MAX_MESSAGE_SIZE {
            return Err(ProtoError::FrameTooLarge {
                max: MAX_MESSAGE_SIZE,
                actual: total,
            });
        }
        if data.len() != 4 + total {
            return Err(ProtoError::InvalidLength {
                expected: 4 + total,
                actual: data.len(),
            });
        }
        Self::decode_body(&data[4..])
    }
}

/// Borrowed views into a client message body.
///
/// Used on the routing hot path to avoid copying the payload before it is
/// serialized into an envelope.
#[derive(Debug)]
pub struct ClientMessageRef<'a> {
    /// Raw recipient field (64 bytes, unvalidated).
    pub to: &'a [u8],
    /// Raw message id.
    pub msg_id: &'a [u8],
    /// Payload slice.
    pub payload: &'a [u8],
}

/// Slices a message body into its fields with full bounds validation.
///
/// # Errors
///
/// Returns [`ProtoError`] under the same conditions as
/// [`ClientMessage::decode_body`].
pub fn split_body(body: &[u8]) -> Result<ClientMessageRef<'_>, ProtoError> {
    if body.len() < MIN_MESSAGE_SIZE {
        return Err(ProtoError::InvalidLength {
            expected: MIN_MESSAGE_SIZE,
            actual: body.len(),
        });
    }
    let msg_id_len = u16::from_be_bytes([body[TO_LEN], body[TO_LEN + 1]]) as usize;
    if msg_id_len > MAX_MSG_ID_LEN {
        return Err(ProtoError::FrameTooLarge {
            max: MAX_MSG_ID_LEN,
            actual: msg_id_len,
        });
    }
    let msg_id_end = MIN_MESSAGE_SIZE + msg_id_len;
    if msg_id_end > body.len() {
        return Err(ProtoError::InvalidLength {
            expected: msg_id_end,
            actual: body.len(),
        });
    }
    Ok(ClientMessageRef {
        to: &body[..TO_LEN],
        msg_id: &body[MIN_MESSAGE_SIZE..msg_id_end],
        payload: &body[msg_id_end..],
    })
}

/// An opaque blob from the router to a client: a serialized envelope.
///
/// Wire form: `Len(4, be) | Data(Len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Serialized envelope bytes.
    pub data: Vec<u8>,
}

impl ServerMessage {
    /// Serializes the message, length prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] if the data exceeds [`MAX_ENVELOPE_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        encode_server_frame(&self.data)
    }

    /// Parses a complete encoded message, length prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] on a bad prefix or length mismatch.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < 4 {
            return Err(ProtoError::InvalidLength {
                expected: 4,
                actual: data.len(),
            });
        }
        let total = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if total > MAX_ENVELOPE_SIZE {
            return Err(ProtoError::FrameTooLarge {
                max: MAX_ENVELOPE_SIZE,
                actual: total,
            });
        }
        if data.len() != 4 + total {
            return Err(ProtoError::InvalidLength {
                expected: 4 + total,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: data[4..].to_vec(),
        })
    }
}

/// Serializes a server frame directly from a payload slice.
///
/// Preferred on the delivery hot path: avoids the intermediate
/// [`ServerMessage`] when the envelope bytes are already at hand.
///
/// # Errors
///
/// Returns [`ProtoError`] if the payload exceeds [`MAX_ENVELOPE_SIZE`].
pub fn encode_server_frame(data: &[u8]) -> Result<Vec<u8>, ProtoError> {
    if data.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtoError::FrameTooLarge {
            max: MAX_ENVELOPE_SIZE,
            actual: data.len(),
        });
    }
    let mut v = Vec::with_capacity(4 + data.len());
    #[allow(clippy::cast_possible_truncation)]
    v.extend_from_slice(&(data.len() as u32).to_be_bytes());
    v.extend_from_slice(data);
    Ok(v)
}
