//! Persistent storage for CryptoSafe.
//!
//! A single SQLite database holds vault entries, the audit log, settings and
//! key metadata. This crate owns the connection handles, the versioned schema
//! and the transaction discipline:
//! - one writer connection behind a mutex, so writes never interleave
//! - a separate reader connection for file databases (WAL mode)
//! - bounded back-off when another process holds the database lock

pub mod db;
pub mod retry;
pub mod schema;

pub use db::{storage_error, Database};
pub use retry::RetryConfig;
pub use schema::SCHEMA_VERSION;
