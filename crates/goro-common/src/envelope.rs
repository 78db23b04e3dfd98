//! The routed message envelope.
//!
//! The router wraps each client message in an envelope before publishing
//! it to the recipient's broker subject; the recipient's SDK parses the
//! envelope back out of the server frame. Serialized with bincode; both
//! ends share this type, which is the only wire agreement the format needs.

use serde::{Deserialize, Serialize};

/// A routed message as delivered to the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender's hex-encoded public key.
    pub from: String,
    /// Recipient's hex-encoded public key.
    pub to: String,
    /// Client-chosen message identifier.
    pub id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Router timestamp, seconds since the Unix epoch.
    pub unix_date_time: i64,
}

impl Envelope {
    /// Serializes the envelope for the broker payload.
    ///
    /// # Errors
    ///
    /// Returns a [`bincode::Error`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Parses an envelope out of a server-frame body.
    ///
    /// # Errors
    ///
    /// Returns a [`bincode::Error`] on malformed input.
    pub fn decode(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let env = Envelope {
            from: "ab".repeat(32),
            to: "cd".repeat(32),
            id: "msg-1".to_string(),
            payload: b"Hello Bob!".to_vec(),
            unix_date_time: 1_722_550_000,
        };
        let bytes = env.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn binary_payload_survives() {
        let env = Envelope {
            from: "00".repeat(32),
            to: "ff".repeat(32),
            id: String::new(),
            payload: (0u8..=255).collect(),
            unix_date_time: 0,
        };
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, env.payload);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(Envelope::decode(b"\x01").is_err());
        assert!(Envelope::decode(&[]).is_err());
    }

    #[test]
    fn serialized_overhead_stays_within_headroom() {
        use crate::types::{MAX_ENVELOPE_SIZE, MAX_MESSAGE_SIZE, MIN_MESSAGE_SIZE};

        // Worst case: a client body at the protocol maximum.
        let id = "i".repeat(256);
        let payload = vec![0u8; MAX_MESSAGE_SIZE - MIN_MESSAGE_SIZE - id.len()];
        let env = Envelope {
            from: "ab".repeat(32),
            to: "cd".repeat(32),
            id,
            payload,
            unix_date_time: i64::MAX,
        };
        let bytes = env.encode().unwrap();
        assert!(bytes.len() <= MAX_ENVELOPE_SIZE, "{} bytes", bytes.len());
    }
}
