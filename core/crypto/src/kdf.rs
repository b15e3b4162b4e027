//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. The parameters
//! used for a derivation are persisted next to the salt so that later changes
//! to the configured defaults never lock a user out of an existing vault.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::keys::{Salt, VaultKey, KEY_LENGTH};
use cryptosafe_common::{Error, Result};

/// Domain separation for the unlock verifier.
const VERIFIER_CONTEXT: &[u8] = b"cryptosafe-key-verifier-v1";

/// Length of a verifier in bytes.
pub const VERIFIER_LENGTH: usize = 32;

/// Key derivation function and its work factors.
///
/// Serialized with an `algorithm` tag so new functions can be added as
/// further variants without breaking stored metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum KdfParams {
    /// Argon2id, version 0x13.
    Argon2id {
        /// Memory cost in KiB (e.g., 65536 = 64 MiB).
        memory_cost: u32,
        /// Number of iterations.
        time_cost: u32,
        /// Degree of parallelism.
        parallelism: u32,
    },
}

impl KdfParams {
    /// Create Argon2id parameters with explicit work factors.
    pub fn argon2id(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self::Argon2id {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly 0.5-1 second of derivation time on desktop hardware.
    pub fn interactive() -> Self {
        Self::argon2id(65536, 3, 4) // 64 MiB
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self::argon2id(262144, 4, 4) // 256 MiB
    }

    /// Create moderate parameters for slower machines.
    pub fn moderate() -> Self {
        Self::argon2id(32768, 3, 2) // 32 MiB
    }

    /// Identifier of the derivation function.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Argon2id { .. } => "argon2id",
        }
    }

    /// Check that the work factors are accepted by the underlying function.
    ///
    /// # Errors
    /// - Returns `InvalidInput` describing the rejected parameter
    pub fn validate(&self) -> Result<()> {
        self.argon2_params().map(|_| ())
    }

    /// Serialize to the JSON stored in `key_store.params`.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from stored JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn argon2_params(&self) -> Result<Params> {
        match self {
            Self::Argon2id {
                memory_cost,
                time_cost,
                parallelism,
            } => Params::new(*memory_cost, *time_cost, *parallelism, Some(KEY_LENGTH))
                .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e))),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

impl fmt::Display for KdfParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argon2id {
                memory_cost,
                time_cost,
                parallelism,
            } => write!(
                f,
                "argon2id(m={}KiB, t={}, p={})",
                memory_cost, time_cost, parallelism
            ),
        }
    }
}

impl FromStr for KdfParams {
    type Err = Error;

    /// Parse a KDF identifier into its interactive preset.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "argon2id" | "argon2" => Ok(Self::interactive()),
            other => Err(Error::InvalidInput(format!("Unknown KDF: {}", other))),
        }
    }
}

/// Derive a vault key from a passphrase and salt.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params` must have valid work factors
///
/// # Postconditions
/// - Returns a VaultKey derived from the passphrase
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns `InvalidInput` if passphrase is empty or params are invalid
/// - Returns `Crypto` if the derivation itself fails
///
/// # Security
/// - Passphrase is not stored or logged
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<VaultKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    match params {
        KdfParams::Argon2id { .. } => {
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);
            argon2
                .hash_password_into(passphrase, salt.as_bytes(), &mut key_bytes)
                .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        }
    }

    let key = VaultKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

/// Compute the fingerprint stored to validate a passphrase on unlock.
///
/// One-way and domain separated, so it never equals the key itself.
pub fn compute_verifier(key: &VaultKey) -> [u8; VERIFIER_LENGTH] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(VERIFIER_CONTEXT);
    hasher.update(key.as_bytes());

    let mut verifier = [0u8; VERIFIER_LENGTH];
    verifier.copy_from_slice(&hasher.finalize());
    verifier
}

/// Check a derived key against a stored verifier in constant time.
pub fn verify_key(key: &VaultKey, expected: &[u8]) -> bool {
    let verifier = compute_verifier(key);
    verifier[..].ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams::argon2id(8 * 1024, 1, 1)
    }

    #[test]
    fn test_derive_key_deterministic() {
        let passphrase = b"test-password-123";
        let salt = Salt::from_bytes(&[42u8; 32]).unwrap();
        let params = fast_params();

        let key1 = derive_key(passphrase, &salt, &params).unwrap();
        let key2 = derive_key(passphrase, &salt, &params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let passphrase = b"test-password-123";
        let salt1 = Salt::from_bytes(&[1u8; 32]).unwrap();
        let salt2 = Salt::from_bytes(&[2u8; 32]).unwrap();

        let key1 = derive_key(passphrase, &salt1, &fast_params()).unwrap();
        let key2 = derive_key(passphrase, &salt2, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes(&[42u8; 32]).unwrap();

        let key1 = derive_key(b"password1", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"password2", &salt, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_params() {
        let salt = Salt::from_bytes(&[42u8; 32]).unwrap();

        let key1 = derive_key(b"password", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"password", &salt, &KdfParams::argon2id(8 * 1024, 2, 1)).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();

        assert!(matches!(
            derive_key(b"", &salt, &fast_params()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams::argon2id(1, 0, 0);
        assert!(params.validate().is_err());
        assert!(derive_key(b"pw", &Salt::generate(), &params).is_err());
    }

    #[test]
    fn test_verifier_matches_only_same_key() {
        let salt = Salt::from_bytes(&[99u8; 32]).unwrap();
        let key = derive_key(b"secure-password", &salt, &fast_params()).unwrap();
        let other = derive_key(b"wrong-password", &salt, &fast_params()).unwrap();

        let verifier = compute_verifier(&key);
        assert_ne!(&verifier, key.as_bytes());
        assert!(verify_key(&key, &verifier));
        assert!(!verify_key(&other, &verifier));
        assert!(!verify_key(&key, &verifier[..16]));
    }

    #[test]
    fn test_params_json_roundtrip() {
        let params = KdfParams::moderate();
        let json = params.to_json().unwrap();
        assert!(json.contains("\"algorithm\":\"argon2id\""));
        assert_eq!(KdfParams::from_json(&json).unwrap(), params);
    }

    #[test]
    fn test_params_from_identifier() {
        assert_eq!("argon2id".parse::<KdfParams>().unwrap(), KdfParams::interactive());
        assert!("PLACEHOLDER_KDF".parse::<KdfParams>().is_err());
    }
}
