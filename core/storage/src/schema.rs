//! Versioned database schema.
//!
//! The version marker lives in `PRAGMA user_version`. A fresh database reports
//! 0 and receives the full schema in one transaction; a database already at
//! [`SCHEMA_VERSION`] is left untouched.

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Table definitions.
pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vault_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        username TEXT,
        encrypted_password BLOB NOT NULL,
        url TEXT,
        notes TEXT,
        tags TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        entry_id INTEGER,
        details TEXT,
        signature BLOB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        setting_key TEXT UNIQUE NOT NULL,
        setting_value BLOB NOT NULL,
        encrypted INTEGER NOT NULL CHECK (encrypted IN (0, 1))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS key_store (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key_type TEXT NOT NULL,
        salt BLOB NOT NULL,
        hash BLOB NOT NULL,
        params TEXT
    )
    "#,
];

/// Index definitions.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_vault_title ON vault_entries(title)",
    "CREATE INDEX IF NOT EXISTS idx_audit_entry_id ON audit_log(entry_id)",
    "CREATE INDEX IF NOT EXISTS idx_settings_key ON settings(setting_key)",
];

/// Message raised by the audit triggers.
pub const AUDIT_APPEND_ONLY: &str = "audit_log is append-only";

/// Triggers that reject any rewrite of audit history.
pub const CREATE_TRIGGERS: &[&str] = &[
    r#"
    CREATE TRIGGER IF NOT EXISTS audit_log_no_update
    BEFORE UPDATE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
    BEFORE DELETE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
    "#,
];

/// Tables every initialized database must contain.
pub const TABLES: &[&str] = &["vault_entries", "audit_log", "settings", "key_store"];
