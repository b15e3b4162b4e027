//! Common types used throughout CryptoSafe.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identifier of a vault entry, assigned by the store on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(i64);

impl EntryId {
    /// Create an EntryId from a raw row id.
    ///
    /// # Errors
    /// - Returns error if `id` is not positive
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidInput(format!(
                "Entry id must be positive, got {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the raw row id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

/// Decrypted secret text (entry passwords, clipboard content).
///
/// Zeroized on drop and redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret string.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Build from decrypted bytes.
    ///
    /// # Errors
    /// - Returns error if the bytes are not valid UTF-8
    pub fn from_utf8(bytes: Vec<u8>) -> crate::Result<Self> {
        String::from_utf8(bytes).map(Self).map_err(|e| {
            // The rejected buffer still holds plaintext.
            let mut rejected = e.into_bytes();
            rejected.zeroize();
            crate::Error::Serialization("Secret is not valid UTF-8".to_string())
        })
    }

    /// Expose the secret. Callers should not keep the reference around.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
