use goro_common::KeyPair;
use std::path::PathBuf;
use std::time::Duration;

/// Connection options for [`crate::connect`].
///
/// A fresh key pair is generated unless one is supplied; server
/// certificate verification uses the configured CA bundle, or is skipped
/// entirely with [`ClientOptions::insecure_skip_verify`] (tests and
/// self-signed deployments only).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub(crate) keys: Option<KeyPair>,
    pub(crate) ca_cert_paths: Vec<PathBuf>,
    pub(crate) server_name: Option<String>,
    pub(crate) insecure_skip_verify: bool,
    pub(crate) dial_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) read_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keys: None,
            ca_cert_paths: Vec::new(),
            server_name: None,
            insecure_skip_verify: false,
            dial_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_buffer: 64,
        }
    }
}

impl ClientOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given identity instead of a freshly generated one.
    #[must_use]
    pub fn with_keys(mut self, keys: KeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Adds a PEM CA bundle used to verify the server certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_paths.push(path.into());
        self
    }

    /// Overrides the SNI name (defaults to the host part of the address).
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Disables server certificate verification.
    #[must_use]
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    /// Sets the dial-and-handshake deadline.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the per-message write deadline.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the inbound envelope channel capacity.
    #[must_use]
    pub fn with_read_buffer(mut self, capacity: usize) -> Self {
        self.read_buffer = capacity;
        self
    }
}
