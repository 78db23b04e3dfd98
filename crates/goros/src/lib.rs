//! goro router: authenticated TLS front door over a pub/sub broker.
//!
//! Clients prove control of an ed25519 key through a channel-bound
//! challenge/response handshake; authenticated peers exchange addressed
//! messages that the router fans out through the [`broker`] port.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
/// Pub/sub broker port and the in-process adapter.
pub mod broker;
/// CLI arguments and TOML configuration.
pub mod config;
/// Error types for router operations.
pub mod error;
/// Prometheus metrics and health probes.
pub mod metrics;
/// Per-connection peer state and write pump.
pub mod peer;
mod pool;
mod ratelimit;
/// Identity → peer routing table.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
mod tls;

pub use error::GorosError;
pub use server::{run, serve, ServerState};
