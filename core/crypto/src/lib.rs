//! Cryptographic primitives for CryptoSafe.
//!
//! This module provides:
//! - Key derivation using Argon2id, with verifiers for unlock checks
//! - Authenticated encryption using XChaCha20-Poly1305 or ChaCha20-Poly1305
//! - Key and salt types with automatic zeroization
//! - The hash chain that links audit records together
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod chain;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, CipherScheme};
pub use chain::{chain_link, verify_link, ChainFields, GENESIS};
pub use kdf::{compute_verifier, derive_key, verify_key, KdfParams};
pub use keys::{Salt, VaultKey, KEY_LENGTH, MIN_SALT_LENGTH};
