//! Vault data model: entries, audit records, settings and key metadata.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use cryptosafe_common::{EntryId, Error, Result, SecretString, SensitiveBytes};
use cryptosafe_crypto::{KdfParams, Salt};

/// `key_type` of the master key row.
pub const MASTER_KEY_TYPE: &str = "master";

/// Render a timestamp the way it is persisted (RFC 3339, microseconds, `Z`).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted timestamp.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("Invalid timestamp '{}': {}", text, e)))
}

/// Encode a tag set for the `tags` column.
pub(crate) fn encode_tags(tags: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

/// Decode the `tags` column; NULL means no tags.
pub(crate) fn decode_tags(raw: Option<&str>) -> Result<BTreeSet<String>> {
    match raw {
        Some(text) if !text.is_empty() => Ok(serde_json::from_str(text)?),
        _ => Ok(BTreeSet::new()),
    }
}

/// A stored credential row as persisted. The password is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub id: EntryId,
    pub title: String,
    pub username: Option<String>,
    /// `scheme_tag || nonce || ciphertext || tag`.
    pub encrypted_password: Vec<u8>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub title: String,
    pub username: Option<String>,
    pub password: SecretString,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub tags: BTreeSet<String>,
}

impl NewEntry {
    /// Start a new entry with the required fields.
    pub fn new(title: impl Into<String>, password: SecretString) -> Self {
        Self {
            title: title.into(),
            username: None,
            password,
            url: None,
            notes: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Partial update of an entry. `None` leaves a field unchanged; for the
/// optional columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub username: Option<Option<String>>,
    pub password: Option<SecretString>,
    pub url: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
}

impl EntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn username(mut self, username: Option<String>) -> Self {
        self.username = Some(username);
        self
    }

    pub fn password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn url(mut self, url: Option<String>) -> Self {
        self.url = Some(url);
        self
    }

    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Names of the fields this update touches, in column order.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.username.is_some() {
            fields.push("username");
        }
        if self.password.is_some() {
            fields.push("password");
        }
        if self.url.is_some() {
            fields.push("url");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Entry with its password decrypted. Only produced for an unlocked session.
#[derive(Debug, Clone)]
pub struct DecryptedEntry {
    pub id: EntryId,
    pub title: String,
    pub username: Option<String>,
    pub password: SecretString,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing view of an entry without any secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub title: String,
    pub username: Option<String>,
    pub url: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntrySummary {
    /// Case-insensitive match against title, url and tags.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self
                .url
                .as_deref()
                .is_some_and(|url| url.to_lowercase().contains(needle_lower))
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle_lower))
    }
}

/// Name and flag of a stored setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub encrypted: bool,
}

/// Value of a setting as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    /// Stored in the clear.
    Plain(Vec<u8>),
    /// Stored encrypted and decrypted for this call.
    Decrypted(SensitiveBytes),
}

impl SettingValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SettingValue::Plain(bytes) => bytes,
            SettingValue::Decrypted(bytes) => bytes.as_bytes(),
        }
    }

    pub fn was_encrypted(&self) -> bool {
        matches!(self, SettingValue::Decrypted(_))
    }
}

/// Master key metadata row. Holds the verifier, never the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    pub key_type: String,
    pub salt: Salt,
    pub verifier: Vec<u8>,
    pub kdf_params: KdfParams,
}

/// Audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    EntryCreated,
    EntryUpdated,
    EntryDeleted,
    LoginSucceeded,
    LoginFailed,
    ClipboardCopy,
    ClipboardClear,
    SessionLocked,
    MasterKeyInitialized,
    MasterPasswordChanged,
    SettingChanged,
    SettingDeleted,
    BackupCreated,
}

impl AuditAction {
    pub const ALL: [AuditAction; 13] = [
        AuditAction::EntryCreated,
        AuditAction::EntryUpdated,
        AuditAction::EntryDeleted,
        AuditAction::LoginSucceeded,
        AuditAction::LoginFailed,
        AuditAction::ClipboardCopy,
        AuditAction::ClipboardClear,
        AuditAction::SessionLocked,
        AuditAction::MasterKeyInitialized,
        AuditAction::MasterPasswordChanged,
        AuditAction::SettingChanged,
        AuditAction::SettingDeleted,
        AuditAction::BackupCreated,
    ];

    /// Text stored in the `action` column.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::EntryCreated => "EntryCreated",
            AuditAction::EntryUpdated => "EntryUpdated",
            AuditAction::EntryDeleted => "EntryDeleted",
            AuditAction::LoginSucceeded => "LoginSucceeded",
            AuditAction::LoginFailed => "LoginFailed",
            AuditAction::ClipboardCopy => "ClipboardCopy",
            AuditAction::ClipboardClear => "ClipboardClear",
            AuditAction::SessionLocked => "SessionLocked",
            AuditAction::MasterKeyInitialized => "MasterKeyInitialized",
            AuditAction::MasterPasswordChanged => "MasterPasswordChanged",
            AuditAction::SettingChanged => "SettingChanged",
            AuditAction::SettingDeleted => "SettingDeleted",
            AuditAction::BackupCreated => "BackupCreated",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("Unknown audit action: {}", s)))
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    /// Weak reference; the entry may no longer exist.
    pub entry_id: Option<i64>,
    pub details: String,
    pub signature: Option<Vec<u8>>,
}
