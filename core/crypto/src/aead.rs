//! Authenticated encryption of secret fields.
//!
//! Every ciphertext is self-describing: a one byte scheme tag, the random
//! nonce, then the AEAD output (encrypted payload followed by the Poly1305
//! tag). Decryption dispatches on the stored tag, so a vault written under one
//! scheme stays readable after the configured default changes.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, XChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::keys::KEY_LENGTH;
use cryptosafe_common::{Error, Result};

/// Authentication tag size (16 bytes) for both schemes.
pub const TAG_SIZE: usize = 16;

/// Size of the scheme tag prefix.
pub const SCHEME_TAG_SIZE: usize = 1;

/// Supported authenticated encryption schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherScheme {
    /// XChaCha20-Poly1305 with a 24-byte random nonce.
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
    /// ChaCha20-Poly1305 (RFC 8439) with a 12-byte random nonce.
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherScheme {
    /// Byte written in front of every ciphertext.
    pub fn tag(self) -> u8 {
        match self {
            Self::XChaCha20Poly1305 => 0x01,
            Self::ChaCha20Poly1305 => 0x02,
        }
    }

    /// Resolve a stored scheme tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::XChaCha20Poly1305),
            0x02 => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }

    /// Nonce length in bytes.
    pub fn nonce_size(self) -> usize {
        match self {
            Self::XChaCha20Poly1305 => 24,
            Self::ChaCha20Poly1305 => 12,
        }
    }

    /// Smallest well-formed ciphertext (empty plaintext).
    pub fn min_ciphertext_len(self) -> usize {
        SCHEME_TAG_SIZE + self.nonce_size() + TAG_SIZE
    }

    /// Stable identifier used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Encrypt plaintext under this scheme.
    ///
    /// # Preconditions
    /// - `key` must be exactly KEY_LENGTH bytes
    ///
    /// # Postconditions
    /// - Returns scheme_tag || nonce || ciphertext || tag
    /// - The nonce is freshly generated from the OS RNG
    ///
    /// # Errors
    /// - Returns `InvalidKey` if key length is incorrect
    /// - Returns `Crypto` if encryption fails
    pub fn encrypt(self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        match self {
            Self::XChaCha20Poly1305 => seal::<XChaCha20Poly1305>(self, key, plaintext),
            Self::ChaCha20Poly1305 => seal::<ChaCha20Poly1305>(self, key, plaintext),
        }
    }
}

impl fmt::Display for CipherScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xchacha20-poly1305" | "xchacha20poly1305" => Ok(Self::XChaCha20Poly1305),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(Error::InvalidInput(format!(
                "Unknown encryption scheme: {}",
                other
            ))),
        }
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(())
}

fn seal<C>(scheme: CipherScheme, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new(GenericArray::from_slice(key));
    let nonce = C::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(SCHEME_TAG_SIZE + nonce.len() + ciphertext.len());
    result.push(scheme.tag());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open<C>(scheme: CipherScheme, key: &[u8], body: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    let (nonce_bytes, encrypted) = body.split_at(scheme.nonce_size());
    let cipher = C::new(GenericArray::from_slice(key));

    cipher
        .decrypt(GenericArray::from_slice(nonce_bytes), encrypted)
        .map_err(|_| Error::Integrity("Authentication tag mismatch".to_string()))
}

/// Encrypt plaintext with the default scheme (XChaCha20-Poly1305).
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    CipherScheme::default().encrypt(key, plaintext)
}

/// Decrypt a ciphertext produced by any supported scheme.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
/// - Ciphertext format: scheme_tag || nonce || encrypted_data || tag
///
/// # Errors
/// - Returns `InvalidKey` if key length is incorrect
/// - Returns `Integrity` if the scheme tag is unknown, the input is truncated,
///   or authentication fails
///
/// # Security
/// - Authenticates before returning anything; never yields partial plaintext
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let (&tag, body) = ciphertext
        .split_first()
        .ok_or_else(|| Error::Integrity("Ciphertext is empty".to_string()))?;
    let scheme = CipherScheme::from_tag(tag)
        .ok_or_else(|| Error::Integrity(format!("Unknown scheme tag 0x{:02x}", tag)))?;

    if ciphertext.len() < scheme.min_ciphertext_len() {
        return Err(Error::Integrity("Ciphertext too short".to_string()));
    }

    match scheme {
        CipherScheme::XChaCha20Poly1305 => open::<XChaCha20Poly1305>(scheme, key, body),
        CipherScheme::ChaCha20Poly1305 => open::<ChaCha20Poly1305>(scheme, key, body),
    }
}
