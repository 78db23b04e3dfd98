//! ed25519 key pair generation and persistence.
//!
//! Keys are stored as the raw 64-byte private-key encoding (32-byte seed
//! followed by the 32-byte public key) with owner-only permissions.

use crate::types::PeerId;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Length of the persisted key file.
pub const KEY_FILE_SIZE: usize = 64;

#[cfg(unix)]
const KEY_FILE_PERMS: u32 = 0o600;
#[cfg(unix)]
const KEY_DIR_PERMS: u32 = 0o700;

/// Errors produced by key pair loading and saving.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Underlying file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The key file does not contain exactly 64 bytes.
    #[error("invalid key file size: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
    /// The key file is readable by group or other.
    #[error("key file permissions too open: {mode:o}, expected 0600")]
    PermissionsTooOpen {
        /// Observed permission bits.
        mode: u32,
    },
    /// The embedded public key does not match the seed.
    #[error("malformed key material: {0}")]
    Malformed(#[from] ed25519_dalek::SignatureError),
}

/// An ed25519 key pair identifying one peer.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh key pair from OS randomness.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a key pair from a 32-byte seed. Deterministic; intended for
    /// tests and embedding.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Loads a key pair from a raw 64-byte key file.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the file cannot be read, is not exactly
    /// 64 bytes, has permissions wider than owner-only, or carries a public
    /// key that does not match its seed.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(path)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(IdentityError::PermissionsTooOpen { mode: mode & 0o777 });
            }
        }

        let data = fs::read(path)?;
        if data.len() != KEY_FILE_SIZE {
            return Err(IdentityError::InvalidLength {
                expected: KEY_FILE_SIZE,
                actual: data.len(),
            });
        }
        let mut bytes = [0u8; KEY_FILE_SIZE];
        bytes.copy_from_slice(&data);
        let signing_key = SigningKey::from_keypair_bytes(&bytes)?;
        Ok(Self { signing_key })
    }

    /// Writes the raw 64-byte key to `path` with owner-only permissions,
    /// creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] on any file I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(KEY_DIR_PERMS)
                    .create(parent)?;
            }
            #[cfg(not(unix))]
            fs::create_dir_all(parent)?;
        }

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(KEY_FILE_PERMS);
        }
        let mut file = opts.open(path)?;
        file.write_all(&self.signing_key.to_keypair_bytes())?;
        Ok(())
    }

    /// Loads the key pair at `path`, or generates and saves a fresh one if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if an existing file is unreadable or
    /// malformed, or if saving a fresh key fails.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        match Self::load(path) {
            Ok(kp) => Ok(kp),
            Err(IdentityError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let kp = Self::generate();
                kp.save(path)?;
                Ok(kp)
            }
            Err(e) => Err(e),
        }
    }

    /// Signs `data`, returning the raw 64-byte signature.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    /// Returns the public key as 64 lowercase hex characters.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Returns the raw 32-byte public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> PeerId {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Borrows the underlying signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Returns the verifying half of the key pair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}
