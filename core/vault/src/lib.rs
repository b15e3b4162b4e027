//! Vault engine for CryptoSafe.
//!
//! This module provides:
//! - Encrypted entry and settings storage on top of SQLite
//! - An append-only, hash-chained audit log
//! - The session gate with auto-lock and clipboard expiry
//! - An event bus for UI and integration notifications
//!
//! # Architecture
//! Front ends build a [`CoreConfig`], hand it to a [`VaultManager`] and work
//! through the returned [`SessionManager`]. Store operations are only
//! reachable while the session is unlocked.

pub mod audit;
pub mod config;
pub mod events;
pub mod manager;
pub mod models;
pub mod session;
pub mod store;
pub mod timer;

pub use audit::{AuditLog, ChainReport};
pub use config::{CoreConfig, Environment, SessionPolicy, UserPreferences};
pub use events::{
    AsyncEventHandler, ClearReason, Event, EventBus, EventHandler, EventKind, EventPayload,
};
pub use manager::VaultManager;
pub use models::{
    AuditAction, AuditRecord, DecryptedEntry, EntrySummary, EntryUpdate, KeyMetadata, NewEntry,
    Setting, SettingValue, VaultEntry,
};
pub use session::{LockReason, SessionManager, SessionState};
pub use store::VaultStore;
pub use timer::TimerSlot;
