//! Common utilities and types shared across the CryptoSafe crates.
//!
//! This module provides the error taxonomy used by every layer of the vault
//! engine, plus a handful of newtypes that keep identifiers and secret
//! material from being mixed up with ordinary values.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntryId, SecretString, SensitiveBytes};
