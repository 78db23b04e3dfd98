//! Common types and wire codec shared across the goro protocol stack.
//!
//! This crate provides:
//! - Authentication handshake frames ([`frame`])
//! - Data-phase framing and recipient validation ([`data`])
//! - Channel-bound signing input and ed25519 helpers ([`crypto`])
//! - Key pair persistence ([`identity`])
//! - The routed message envelope ([`envelope`])
//! - Protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod data;
pub mod envelope;
pub mod frame;
pub mod identity;
pub mod types;

pub use crypto::ClockError;
pub use envelope::Envelope;
pub use frame::ProtoError;
pub use identity::KeyPair;
pub use types::PeerId;
