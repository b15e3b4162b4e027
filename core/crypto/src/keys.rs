//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use cryptosafe_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Minimum accepted salt length in bytes.
pub const MIN_SALT_LENGTH: usize = 16;

/// Length of freshly generated salts.
pub const GENERATED_SALT_LENGTH: usize = 32;

/// Working key derived from the master passphrase.
///
/// Only the session manager holds one for longer than a single call.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a vault key from a slice.
    ///
    /// # Errors
    /// - Returns `InvalidKey` if the slice is not KEY_LENGTH bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = key.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = vec![0u8; GENERATED_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Generate a random salt that differs from `previous`.
    pub fn regenerate(previous: &Salt) -> Self {
        loop {
            let salt = Self::generate();
            if salt != *previous {
                return salt;
            }
        }
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - Returns `InvalidInput` if fewer than MIN_SALT_LENGTH bytes are given
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_SALT_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Salt must be at least {} bytes, got {}",
                MIN_SALT_LENGTH,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for Salt {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes(&bytes)
    }
}

impl From<Salt> for Vec<u8> {
    fn from(salt: Salt) -> Self {
        salt.0
    }
}
