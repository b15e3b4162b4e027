//! Common error types for CryptoSafe.

use thiserror::Error;

/// Top-level error type for vault engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed arguments: empty passphrase, undersized salt, missing title.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The supplied passphrase did not match the stored verifier.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// An operation that needs the working key was attempted while locked.
    #[error("Session is locked")]
    Locked,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Authenticated decryption failed or the ciphertext was truncated.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Key material has the wrong length for the selected scheme.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The operation is not supported, e.g. rewriting audit history.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// One or more event subscribers failed during publish.
    #[error("Event handler failed: {0}")]
    Handler(String),

    /// Storage stayed locked by another writer after bounded retries.
    #[error("Storage busy: {0}")]
    StorageBusy(String),

    /// The operation did not complete within the caller's bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cryptographic operation failed for a reason other than integrity.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is transient storage contention worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageBusy(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
