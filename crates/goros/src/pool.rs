//! Admission credit pool and message read-buffer pool.
//!
//! A connection is admitted by taking a pre-initialized authentication
//! scratch buffer from a fixed pool; the buffer doubles as the admission
//! credit, so outstanding buffers never exceed `max_connections` and every
//! handshake runs allocation-free.

use goro_common::types::{
    CHALLENGE_SIZE, PUBLIC_KEY_SIZE, SERVER_ID_SIZE, SIGNATURE_SIZE, SIGNED_DATA_SIZE,
    TIMESTAMP_SIZE,
};
use std::sync::Mutex;

/// Offsets of the disjoint regions inside an auth scratch buffer:
///
/// ```text
/// [0..32)     client public key (survives authentication)
/// [32..64)    challenge
/// [64..72)    timestamp (big-endian u64)
/// [72..104)   server id (written at pool construction)
/// [104..168)  client signature
/// [168..316)  signing input for verification
/// [316..444)  work area for frame assembly and staging reads
/// ```
const OFF_PUB_KEY: usize = 0;
const OFF_CHALLENGE: usize = OFF_PUB_KEY + PUBLIC_KEY_SIZE;
const OFF_TIMESTAMP: usize = OFF_CHALLENGE + CHALLENGE_SIZE;
const OFF_SERVER_ID: usize = OFF_TIMESTAMP + TIMESTAMP_SIZE;
const OFF_SIGNATURE: usize = OFF_SERVER_ID + SERVER_ID_SIZE;
const OFF_SIGNED_DATA: usize = OFF_SIGNATURE + SIGNATURE_SIZE;
const OFF_WORK: usize = OFF_SIGNED_DATA + SIGNED_DATA_SIZE;
const WORK_SIZE: usize = 128;

/// Total scratch buffer size.
pub const AUTH_BUF_SIZE: usize = OFF_WORK + WORK_SIZE;

/// A fixed-layout scratch buffer for one authentication exchange.
///
/// Regions never overlap, so the signing input can be materialized and
/// verified against slices of the same allocation.
pub struct AuthBuffer {
    buf: Box<[u8; AUTH_BUF_SIZE]>,
}

impl AuthBuffer {
    fn new(server_id: &[u8; SERVER_ID_SIZE]) -> Self {
        let mut buf = Box::new([0u8; AUTH_BUF_SIZE]);
        buf[OFF_SERVER_ID..OFF_SERVER_ID + SERVER_ID_SIZE].copy_from_slice(server_id);
        Self { buf }
    }

    /// Mutable public-key region, filled from the client hello.
    pub fn pub_key_mut(&mut self) -> &mut [u8] {
        &mut self.buf[OFF_PUB_KEY..OFF_PUB_KEY + PUBLIC_KEY_SIZE]
    }

    /// Copy of the public-key region; consumed by the caller after a
    /// successful handshake to form the peer id.
    #[must_use]
    pub fn pub_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(&self.buf[OFF_PUB_KEY..OFF_PUB_KEY + PUBLIC_KEY_SIZE]);
        out
    }

    /// Mutable challenge region, filled with fresh randomness per attempt.
    pub fn challenge_mut(&mut self) -> &mut [u8] {
        &mut self.buf[OFF_CHALLENGE..OFF_CHALLENGE + CHALLENGE_SIZE]
    }

    /// Copy of the challenge region.
    #[must_use]
    pub fn challenge(&self) -> [u8; CHALLENGE_SIZE] {
        let mut out = [0u8; CHALLENGE_SIZE];
        out.copy_from_slice(&self.buf[OFF_CHALLENGE..OFF_CHALLENGE + CHALLENGE_SIZE]);
        out
    }

    /// Writes the challenge timestamp.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.buf[OFF_TIMESTAMP..OFF_TIMESTAMP + TIMESTAMP_SIZE]
            .copy_from_slice(&timestamp.to_be_bytes());
    }

    /// Copy of the server-id region (pre-written at pool construction).
    #[must_use]
    pub fn server_id(&self) -> [u8; SERVER_ID_SIZE] {
        let mut out = [0u8; SERVER_ID_SIZE];
        out.copy_from_slice(&self.buf[OFF_SERVER_ID..OFF_SERVER_ID + SERVER_ID_SIZE]);
        out
    }

    /// Mutable signature region, filled from the client response.
    pub fn signature_mut(&mut self) -> &mut [u8] {
        &mut self.buf[OFF_SIGNATURE..OFF_SIGNATURE + SIGNATURE_SIZE]
    }

    /// Copy of the signature region.
    #[must_use]
    pub fn signature(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&self.buf[OFF_SIGNATURE..OFF_SIGNATURE + SIGNATURE_SIZE]);
        out
    }

    /// Mutable signing-input region.
    pub fn signed_data_mut(&mut self) -> &mut [u8; SIGNED_DATA_SIZE] {
        (&mut self.buf[OFF_SIGNED_DATA..OFF_SIGNED_DATA + SIGNED_DATA_SIZE])
            .try_into()
            .expect("signed data region has fixed size")
    }

    /// Read-only signing-input region.
    #[must_use]
    pub fn signed_data(&self) -> &[u8] {
        &self.buf[OFF_SIGNED_DATA..OFF_SIGNED_DATA + SIGNED_DATA_SIZE]
    }

    /// Mutable work region of the given length, for staging reads and
    /// assembling outbound frames.
    pub fn work_mut(&mut self, len: usize) -> &mut [u8] {
        debug_assert!(len <= WORK_SIZE);
        &mut self.buf[OFF_WORK..OFF_WORK + len]
    }
}

impl std::fmt::Debug for AuthBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBuffer").finish_non_exhaustive()
    }
}

/// The admission credit pool: a fixed set of auth scratch buffers.
pub struct AuthBufferPool {
    buffers: Mutex<Vec<AuthBuffer>>,
    capacity: usize,
}

impl AuthBufferPool {
    /// Pre-allocates `capacity` buffers, each with `server_id` written
    /// into its fixed region.
    #[must_use]
    pub fn new(capacity: usize, server_id: &[u8; SERVER_ID_SIZE]) -> Self {
        let buffers = (0..capacity).map(|_| AuthBuffer::new(server_id)).collect();
        Self {
            buffers: Mutex::new(buffers),
            capacity,
        }
    }

    /// Takes a buffer, or `None` when all credits are outstanding.
    /// Never blocks.
    #[must_use]
    pub fn acquire(&self) -> Option<AuthBuffer> {
        self.buffers.lock().expect("auth pool lock poisoned").pop()
    }

    /// Returns a buffer to the pool.
    pub fn release(&self, buf: AuthBuffer) {
        let mut buffers = self.buffers.lock().expect("auth pool lock poisoned");
        debug_assert!(buffers.len() < self.capacity);
        buffers.push(buf);
    }

    /// Number of available credits.
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffers.lock().expect("auth pool lock poisoned").len()
    }

    /// Pool capacity (`max_connections`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Recycled read buffers for the per-message hot path.
///
/// Buffers are borrowed for one message parse and returned unconditionally;
/// an empty pool hands out a fresh allocation rather than blocking.
pub struct MsgBufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    max_retained: usize,
}

impl MsgBufferPool {
    /// Creates a pool of `max_message_size`-byte buffers, retaining at most
    /// `max_retained` idle ones.
    #[must_use]
    pub fn new(buf_size: usize, max_retained: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buf_size,
            max_retained,
        }
    }

    /// Borrows a buffer of `buf_size` bytes.
    #[must_use]
    pub fn get(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .expect("msg pool lock poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_size])
    }

    /// Returns a buffer to the pool.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() != self.buf_size {
            return;
        }
        let mut buffers = self.buffers.lock().expect("msg pool lock poisoned");
        if buffers.len() < self.max_retained {
            buffers.push(buf);
        }
    }
}
