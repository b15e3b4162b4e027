//! Persistent store for vault entries, settings and key metadata.
//!
//! Every mutation runs in one immediate transaction that also appends the
//! matching audit record, so the change and its audit trail persist together
//! or not at all. Operations touching encrypted fields take the working key
//! from the caller; the store never keeps it.

use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::audit::AuditLog;
use crate::models::{
    decode_tags, encode_tags, format_timestamp, parse_timestamp, AuditAction, DecryptedEntry,
    EntrySummary, EntryUpdate, KeyMetadata, NewEntry, Setting, SettingValue, VaultEntry,
    MASTER_KEY_TYPE,
};
use cryptosafe_common::{EntryId, Error, Result, SecretString, SensitiveBytes};
use cryptosafe_crypto::{
    compute_verifier, decrypt, derive_key, verify_key, CipherScheme, KdfParams, Salt, VaultKey,
};
use cryptosafe_storage::{storage_error, Database};

const SELECT_ENTRY: &str = "SELECT id, title, username, encrypted_password, url, notes, tags, \
                            created_at, updated_at FROM vault_entries";

const SELECT_SUMMARY: &str =
    "SELECT id, title, username, url, tags, created_at, updated_at FROM vault_entries";

/// Encrypted vault store.
pub struct VaultStore {
    db: Arc<Database>,
    audit: AuditLog,
    cipher: CipherScheme,
}

impl VaultStore {
    /// Create a store over an opened database.
    ///
    /// New ciphertexts use `cipher`; existing ones decrypt under whatever
    /// scheme their tag names.
    pub fn new(db: Arc<Database>, audit: AuditLog, cipher: CipherScheme) -> Self {
        Self { db, audit, cipher }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn cipher(&self) -> CipherScheme {
        self.cipher
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // ----- entries -----

    /// Create an entry.
    ///
    /// # Preconditions
    /// - `entry.title` is non-empty after trimming
    ///
    /// # Postconditions
    /// - The password is stored encrypted under `key`
    /// - `created_at == updated_at`
    /// - An `EntryCreated` record is appended in the same transaction
    ///
    /// # Errors
    /// - `InvalidInput` for a missing title
    /// - Storage failure
    pub fn create_entry(&self, key: &VaultKey, entry: NewEntry) -> Result<EntryId> {
        let title = validate_title(&entry.title)?;
        let encrypted = self
            .cipher
            .encrypt(key.as_bytes(), entry.password.expose().as_bytes())?;
        let tags = encode_tags(&entry.tags)?;
        let now = Utc::now();
        let stamp = format_timestamp(now);

        let id = self.db.write(|tx| {
            tx.execute(
                "INSERT INTO vault_entries \
                 (title, username, encrypted_password, url, notes, tags, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    title,
                    entry.username,
                    encrypted,
                    entry.url,
                    entry.notes,
                    tags,
                    stamp
                ],
            )
            .map_err(storage_error)?;
            let id = EntryId::new(tx.last_insert_rowid())?;
            self.audit.append_in(
                tx,
                AuditAction::EntryCreated,
                now,
                Some(id),
                &format!("title={}", title),
            )?;
            Ok(id)
        })?;

        info!(entry_id = %id, "Entry created");
        Ok(id)
    }

    /// Apply a partial update.
    ///
    /// A new password is encrypted with a fresh nonce. The audit record lists
    /// the changed field names, never their values.
    ///
    /// # Errors
    /// - `NotFound` if the entry does not exist
    /// - `InvalidInput` if a provided title is blank
    pub fn update_entry(&self, key: &VaultKey, id: EntryId, update: EntryUpdate) -> Result<()> {
        let title = update.title.as_deref().map(validate_title).transpose()?;
        let encrypted = update
            .password
            .as_ref()
            .map(|password| self.cipher.encrypt(key.as_bytes(), password.expose().as_bytes()))
            .transpose()?;
        let tags = update.tags.as_ref().map(encode_tags).transpose()?;
        let changed = update.changed_fields();
        let now = Utc::now();
        let stamp = format_timestamp(now);

        self.db.write(|tx| {
            ensure_entry(tx, id)?;

            let mut columns: Vec<&str> = Vec::new();
            let mut values: Vec<&dyn ToSql> = Vec::new();
            if let Some(title) = &title {
                columns.push("title = ?");
                values.push(title);
            }
            if let Some(username) = &update.username {
                columns.push("username = ?");
                values.push(username);
            }
            if let Some(encrypted) = &encrypted {
                columns.push("encrypted_password = ?");
                values.push(encrypted);
            }
            if let Some(url) = &update.url {
                columns.push("url = ?");
                values.push(url);
            }
            if let Some(notes) = &update.notes {
                columns.push("notes = ?");
                values.push(notes);
            }
            if let Some(tags) = &tags {
                columns.push("tags = ?");
                values.push(tags);
            }
            columns.push("updated_at = ?");
            values.push(&stamp);
            let raw_id = id.get();
            values.push(&raw_id);

            let sql = format!(
                "UPDATE vault_entries SET {} WHERE id = ?",
                columns.join(", ")
            );
            tx.execute(&sql, values.as_slice()).map_err(storage_error)?;

            let details = if changed.is_empty() {
                "fields=".to_string()
            } else {
                format!("fields={}", changed.join(","))
            };
            self.audit
                .append_in(tx, AuditAction::EntryUpdated, now, Some(id), &details)?;
            Ok(())
        })?;

        info!(entry_id = %id, fields = ?changed, "Entry updated");
        Ok(())
    }

    /// Hard-delete an entry. Its audit history is kept.
    ///
    /// # Errors
    /// - `NotFound` if the entry does not exist
    pub fn delete_entry(&self, id: EntryId) -> Result<()> {
        self.db.write(|tx| {
            let title = ensure_entry(tx, id)?;
            tx.execute("DELETE FROM vault_entries WHERE id = ?1", params![id.get()])
                .map_err(storage_error)?;
            self.audit.append_in(
                tx,
                AuditAction::EntryDeleted,
                Utc::now(),
                Some(id),
                &format!("title={}", title),
            )?;
            Ok(())
        })?;

        info!(entry_id = %id, "Entry deleted");
        Ok(())
    }

    /// Fetch an entry with its password decrypted.
    ///
    /// # Errors
    /// - `NotFound` if the entry does not exist
    /// - `Integrity` if the ciphertext does not authenticate under `key`
    pub fn get_entry(&self, key: &VaultKey, id: EntryId) -> Result<DecryptedEntry> {
        let entry = self.get_raw_entry(id)?;
        let plaintext = decrypt(key.as_bytes(), &entry.encrypted_password)?;
        let password = SecretString::from_utf8(plaintext)?;

        debug!(entry_id = %id, "Entry decrypted");
        Ok(DecryptedEntry {
            id: entry.id,
            title: entry.title,
            username: entry.username,
            password,
            url: entry.url,
            notes: entry.notes,
            tags: entry.tags,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    /// Fetch an entry as stored, password still encrypted.
    pub fn get_raw_entry(&self, id: EntryId) -> Result<VaultEntry> {
        let row = self.db.read(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_ENTRY),
                params![id.get()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(storage_error)
        })?;

        let (raw_id, title, username, encrypted_password, url, notes, tags, created, updated) =
            row.ok_or_else(|| Error::NotFound(format!("Entry {}", id)))?;

        Ok(VaultEntry {
            id: EntryId::new(raw_id)?,
            title,
            username,
            encrypted_password,
            url,
            notes,
            tags: decode_tags(tags.as_deref())?,
            created_at: parse_timestamp(&created)?,
            updated_at: parse_timestamp(&updated)?,
        })
    }

    /// Listing view of one entry.
    pub fn get_summary(&self, id: EntryId) -> Result<EntrySummary> {
        self.summaries(&format!("{} WHERE id = ?1", SELECT_SUMMARY), Some(id.get()))?
            .pop()
            .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))
    }

    /// All entries without secret material, ordered by title then id.
    pub fn list_entries(&self) -> Result<Vec<EntrySummary>> {
        self.summaries(&format!("{} ORDER BY title, id", SELECT_SUMMARY), None)
    }

    /// Entries whose title, url or a tag contains `query`, ignoring case.
    /// A blank query matches everything.
    pub fn search_entries(&self, query: &str) -> Result<Vec<EntrySummary>> {
        let needle = query.trim().to_lowercase();
        let entries = self.list_entries()?;
        if needle.is_empty() {
            return Ok(entries);
        }
        Ok(entries
            .into_iter()
            .filter(|entry| entry.matches(&needle))
            .collect())
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> Result<u64> {
        self.db.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM vault_entries", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(storage_error)
        })
    }

    fn summaries(&self, sql: &str, id: Option<i64>) -> Result<Vec<EntrySummary>> {
        type Row = (
            i64,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            String,
        );

        let rows: Vec<Row> = self.db.read(|conn| {
            let mut stmt = conn.prepare(sql).map_err(storage_error)?;
            let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Row> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            };
            let rows = match id {
                Some(id) => stmt.query_map(params![id], map),
                None => stmt.query_map([], map),
            }
            .map_err(storage_error)?
            .collect::<rusqlite::Result<Vec<Row>>>()
            .map_err(storage_error)?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(id, title, username, url, tags, created, updated)| {
                Ok(EntrySummary {
                    id: EntryId::new(id)?,
                    title,
                    username,
                    url,
                    tags: decode_tags(tags.as_deref())?,
                    created_at: parse_timestamp(&created)?,
                    updated_at: parse_timestamp(&updated)?,
                })
            })
            .collect()
    }

    // ----- settings -----

    /// Store a plaintext setting.
    pub fn set_setting(&self, name: &str, value: &[u8]) -> Result<()> {
        let name = validate_setting_name(name)?;
        self.upsert_setting(name, value, false)
    }

    /// Store a setting encrypted under `key`.
    pub fn set_secret_setting(&self, key: &VaultKey, name: &str, value: &[u8]) -> Result<()> {
        let name = validate_setting_name(name)?;
        let encrypted = self.cipher.encrypt(key.as_bytes(), value)?;
        self.upsert_setting(name, &encrypted, true)
    }

    fn upsert_setting(&self, name: &str, value: &[u8], encrypted: bool) -> Result<()> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO settings (setting_key, setting_value, encrypted) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(setting_key) DO UPDATE SET \
                 setting_value = excluded.setting_value, encrypted = excluded.encrypted",
                params![name, value, encrypted],
            )
            .map_err(storage_error)?;
            self.audit.append_in(
                tx,
                AuditAction::SettingChanged,
                Utc::now(),
                None,
                &format!("key={} encrypted={}", name, encrypted),
            )?;
            Ok(())
        })?;

        info!(setting = name, encrypted, "Setting stored");
        Ok(())
    }

    /// Read a setting.
    ///
    /// # Errors
    /// - `NotFound` if the setting does not exist
    /// - `Locked` if it is encrypted and no key was supplied
    /// - `Integrity` if it does not decrypt under `key`
    pub fn get_setting(&self, name: &str, key: Option<&VaultKey>) -> Result<SettingValue> {
        let name = validate_setting_name(name)?;
        let row: Option<(Vec<u8>, bool)> = self.db.read(|conn| {
            conn.query_row(
                "SELECT setting_value, encrypted FROM settings WHERE setting_key = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_error)
        })?;

        match row {
            None => Err(Error::NotFound(format!("Setting {}", name))),
            Some((value, false)) => Ok(SettingValue::Plain(value)),
            Some((value, true)) => {
                let key = key.ok_or(Error::Locked)?;
                let plaintext = decrypt(key.as_bytes(), &value)?;
                Ok(SettingValue::Decrypted(SensitiveBytes::new(plaintext)))
            }
        }
    }

    /// Remove a setting.
    ///
    /// # Errors
    /// - `NotFound` if the setting does not exist
    pub fn delete_setting(&self, name: &str) -> Result<()> {
        let name = validate_setting_name(name)?;
        self.db.write(|tx| {
            let removed = tx
                .execute("DELETE FROM settings WHERE setting_key = ?1", params![name])
                .map_err(storage_error)?;
            if removed == 0 {
                return Err(Error::NotFound(format!("Setting {}", name)));
            }
            self.audit.append_in(
                tx,
                AuditAction::SettingDeleted,
                Utc::now(),
                None,
                &format!("key={}", name),
            )?;
            Ok(())
        })?;

        info!(setting = name, "Setting deleted");
        Ok(())
    }

    /// Names and flags of all settings, ordered by name.
    pub fn list_settings(&self) -> Result<Vec<Setting>> {
        self.db.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT setting_key, encrypted FROM settings ORDER BY setting_key")
                .map_err(storage_error)?;
            let settings = stmt
                .query_map([], |row| {
                    Ok(Setting {
                        key: row.get(0)?,
                        encrypted: row.get(1)?,
                    })
                })
                .map_err(storage_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_error)?;
            Ok(settings)
        })
    }

    // ----- key metadata -----

    /// The active master key row, if the vault has been initialized.
    pub fn master_key_metadata(&self) -> Result<Option<KeyMetadata>> {
        self.db.read(|conn| read_master(conn))
    }

    /// Set up the master key on first run.
    ///
    /// # Preconditions
    /// - No master key exists yet
    /// - `passphrase` has at least `min_len` characters
    ///
    /// # Postconditions
    /// - One master row with a fresh salt, the verifier and `params`
    /// - A `MasterKeyInitialized` record is appended
    ///
    /// # Errors
    /// - `AlreadyExists` if a master key is present
    /// - `InvalidInput` for a short passphrase or invalid params
    pub fn initialize_master(
        &self,
        passphrase: &str,
        params: &KdfParams,
        min_len: usize,
    ) -> Result<KeyMetadata> {
        check_passphrase(passphrase, min_len)?;
        if self.master_key_metadata()?.is_some() {
            return Err(Error::AlreadyExists("Master key".to_string()));
        }

        let salt = Salt::generate();
        let key = derive_key(passphrase.as_bytes(), &salt, params)?;
        let metadata = KeyMetadata {
            key_type: MASTER_KEY_TYPE.to_string(),
            salt,
            verifier: compute_verifier(&key).to_vec(),
            kdf_params: params.clone(),
        };
        let params_json = params.to_json()?;

        self.db.write(|tx| {
            if read_master(tx)?.is_some() {
                return Err(Error::AlreadyExists("Master key".to_string()));
            }
            tx.execute(
                "INSERT INTO key_store (key_type, salt, hash, params) VALUES (?1, ?2, ?3, ?4)",
                params![
                    MASTER_KEY_TYPE,
                    metadata.salt.as_bytes(),
                    metadata.verifier,
                    params_json
                ],
            )
            .map_err(storage_error)?;
            self.audit.append_in(
                tx,
                AuditAction::MasterKeyInitialized,
                Utc::now(),
                None,
                &format!("kdf={}", params),
            )?;
            Ok(())
        })?;

        info!(kdf = %params, "Master key initialized");
        Ok(metadata)
    }

    /// Derive the key for `passphrase` and check it against the master row.
    ///
    /// # Errors
    /// - `NotFound` if the vault has not been initialized
    /// - `AuthenticationFailed` on verifier mismatch
    pub fn verify_passphrase(&self, passphrase: &str) -> Result<VaultKey> {
        let metadata = self
            .master_key_metadata()?
            .ok_or_else(|| Error::NotFound("Master key".to_string()))?;
        let key = derive_key(passphrase.as_bytes(), &metadata.salt, &metadata.kdf_params)?;
        if verify_key(&key, &metadata.verifier) {
            Ok(key)
        } else {
            Err(Error::AuthenticationFailed)
        }
    }

    /// Replace the master passphrase.
    ///
    /// # Preconditions
    /// - `old_key` matches the current verifier
    ///
    /// # Postconditions
    /// - New salt, different from the previous one
    /// - Every entry password and encrypted setting is re-encrypted under
    ///   the returned key
    /// - Master row replaced and `MasterPasswordChanged` appended, all in one
    ///   transaction
    ///
    /// # Errors
    /// - `NotFound` if the vault has not been initialized
    /// - `AuthenticationFailed` if `old_key` is not the current key
    /// - `InvalidInput` for a short passphrase
    /// - `Integrity` if any stored ciphertext fails to authenticate
    pub fn rotate_master(
        &self,
        old_key: &VaultKey,
        new_passphrase: &str,
        params: &KdfParams,
        min_len: usize,
    ) -> Result<VaultKey> {
        check_passphrase(new_passphrase, min_len)?;
        let current = self
            .master_key_metadata()?
            .ok_or_else(|| Error::NotFound("Master key".to_string()))?;
        if !verify_key(old_key, &current.verifier) {
            return Err(Error::AuthenticationFailed);
        }

        let salt = Salt::regenerate(&current.salt);
        let new_key = derive_key(new_passphrase.as_bytes(), &salt, params)?;
        let verifier = compute_verifier(&new_key).to_vec();
        let params_json = params.to_json()?;

        let (entries, settings) = self.db.write(|tx| {
            let entries = reencrypt_column(
                tx,
                "SELECT id, encrypted_password FROM vault_entries",
                "UPDATE vault_entries SET encrypted_password = ?1 WHERE id = ?2",
                old_key,
                &new_key,
                self.cipher,
            )?;
            let settings = reencrypt_column(
                tx,
                "SELECT id, setting_value FROM settings WHERE encrypted = 1",
                "UPDATE settings SET setting_value = ?1 WHERE id = ?2",
                old_key,
                &new_key,
                self.cipher,
            )?;

            let replaced = tx
                .execute(
                    "UPDATE key_store SET salt = ?1, hash = ?2, params = ?3 WHERE key_type = ?4",
                    params![salt.as_bytes(), verifier, params_json, MASTER_KEY_TYPE],
                )
                .map_err(storage_error)?;
            if replaced != 1 {
                return Err(Error::Storage(format!(
                    "Expected one master key row, found {}",
                    replaced
                )));
            }

            self.audit.append_in(
                tx,
                AuditAction::MasterPasswordChanged,
                Utc::now(),
                None,
                &format!("entries={} settings={}", entries, settings),
            )?;
            Ok((entries, settings))
        })?;

        info!(entries, settings, "Master password changed");
        Ok(new_key)
    }

    // ----- maintenance -----

    /// Write a consistent copy of the database to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        self.db.backup_to(dest)?;
        self.audit.append(
            AuditAction::BackupCreated,
            Utc::now(),
            None,
            &format!("dest={}", dest.display()),
        )?;
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<&str> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Entry title is required".to_string()));
    }
    Ok(trimmed)
}

fn validate_setting_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Setting name is required".to_string()));
    }
    Ok(trimmed)
}

fn check_passphrase(passphrase: &str, min_len: usize) -> Result<()> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase must not be empty".to_string()));
    }
    if passphrase.chars().count() < min_len {
        return Err(Error::InvalidInput(format!(
            "Passphrase must be at least {} characters",
            min_len
        )));
    }
    Ok(())
}

/// Title of an existing entry, or `NotFound`.
fn ensure_entry(tx: &Transaction<'_>, id: EntryId) -> Result<String> {
    tx.query_row(
        "SELECT title FROM vault_entries WHERE id = ?1",
        params![id.get()],
        |row| row.get(0),
    )
    .optional()
    .map_err(storage_error)?
    .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))
}

fn read_master(conn: &rusqlite::Connection) -> Result<Option<KeyMetadata>> {
    let row: Option<(String, Vec<u8>, Vec<u8>, Option<String>)> = conn
        .query_row(
            "SELECT key_type, salt, hash, params FROM key_store \
             WHERE key_type = ?1 ORDER BY id DESC LIMIT 1",
            params![MASTER_KEY_TYPE],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(storage_error)?;

    row.map(|(key_type, salt, verifier, params)| {
        let params = params
            .ok_or_else(|| Error::Serialization("Master key has no KDF params".to_string()))?;
        Ok(KeyMetadata {
            key_type,
            salt: Salt::from_bytes(&salt)?,
            verifier,
            kdf_params: KdfParams::from_json(&params)?,
        })
    })
    .transpose()
}

/// Decrypt every blob selected by `select` under `old` and write it back
/// encrypted under `new`. Returns the number of rows rewritten.
fn reencrypt_column(
    tx: &Transaction<'_>,
    select: &str,
    update: &str,
    old: &VaultKey,
    new: &VaultKey,
    cipher: CipherScheme,
) -> Result<usize> {
    let mut stmt = tx.prepare(select).map_err(storage_error)?;
    let rows: Vec<(i64, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(storage_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_error)?;

    for (id, ciphertext) in &rows {
        let plaintext = Zeroizing::new(decrypt(old.as_bytes(), ciphertext)?);
        let rewrapped = cipher.encrypt(new.as_bytes(), &plaintext)?;
        tx.execute(update, params![rewrapped, id])
            .map_err(storage_error)?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams::argon2id(8 * 1024, 1, 1)
    }

    fn store() -> VaultStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let audit = AuditLog::new(db.clone(), true);
        VaultStore::new(db, audit, CipherScheme::default())
    }

    fn unlocked_store() -> (VaultStore, VaultKey) {
        let store = store();
        store
            .initialize_master("correct horse", &fast_params(), 6)
            .unwrap();
        let key = store.verify_passphrase("correct horse").unwrap();
        (store, key)
    }

    fn example() -> NewEntry {
        NewEntry::new("Example", SecretString::from("s3cr3t"))
            .with_username("admin")
            .with_url("https://example.com")
    }

    fn actions(store: &VaultStore) -> Vec<AuditAction> {
        store
            .audit()
            .list_range(1, 100)
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    #[test]
    fn test_create_and_get_entry() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();
        assert_eq!(id.get(), 1);

        let entry = store.get_entry(&key, id).unwrap();
        assert_eq!(entry.title, "Example");
        assert_eq!(entry.username.as_deref(), Some("admin"));
        assert_eq!(entry.password.expose(), "s3cr3t");
        assert_eq!(entry.url.as_deref(), Some("https://example.com"));
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[test]
    fn test_password_stored_encrypted() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();

        let raw = store.get_raw_entry(id).unwrap();
        assert_eq!(raw.encrypted_password[0], CipherScheme::default().tag());
        assert!(!raw
            .encrypted_password
            .windows(6)
            .any(|w| w == b"s3cr3t"));
    }

    #[test]
    fn test_blank_title_rejected() {
        let (store, key) = unlocked_store();
        let result = store.create_entry(&key, NewEntry::new("   ", SecretString::from("pw")));

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_update_entry_changes_only_given_fields() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();
        let before = store.get_raw_entry(id).unwrap();

        store
            .update_entry(
                &key,
                id,
                EntryUpdate::new()
                    .password(SecretString::from("n3w"))
                    .url(None),
            )
            .unwrap();

        let after = store.get_entry(&key, id).unwrap();
        assert_eq!(after.title, "Example");
        assert_eq!(after.username.as_deref(), Some("admin"));
        assert_eq!(after.password.expose(), "n3w");
        assert_eq!(after.url, None);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);

        let record = store
            .audit()
            .query_by_action(AuditAction::EntryUpdated)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(record.details, "fields=password,url");
        assert!(!record.details.contains("n3w"));
    }

    #[test]
    fn test_update_missing_entry() {
        let (store, key) = unlocked_store();
        let result = store.update_entry(
            &key,
            EntryId::new(9).unwrap(),
            EntryUpdate::new().title("x"),
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_entry_keeps_audit() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();
        store.delete_entry(id).unwrap();

        assert!(matches!(store.get_entry(&key, id), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_entry(id), Err(Error::NotFound(_))));

        let history: Vec<_> = store
            .audit()
            .query_by_entry(id)
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(
            history,
            vec![AuditAction::EntryCreated, AuditAction::EntryDeleted]
        );
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();

        let other = VaultKey::from_bytes([9u8; 32]);
        assert!(matches!(store.get_entry(&other, id), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_list_and_search() {
        let (store, key) = unlocked_store();
        store
            .create_entry(&key, NewEntry::new("zeta", SecretString::from("a")).with_tag("Bank"))
            .unwrap();
        store
            .create_entry(&key, NewEntry::new("Alpha", SecretString::from("b")))
            .unwrap();

        let titles: Vec<_> = store
            .list_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "zeta"]);

        let hits = store.search_entries("bank").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "zeta");
        assert_eq!(store.search_entries("  ").unwrap().len(), 2);
    }

    #[test]
    fn test_plain_and_secret_settings() {
        let (store, key) = unlocked_store();
        store.set_setting("theme", b"dark").unwrap();
        store.set_secret_setting(&key, "api_token", b"tok").unwrap();

        assert_eq!(
            store.get_setting("theme", None).unwrap(),
            SettingValue::Plain(b"dark".to_vec())
        );
        assert!(matches!(
            store.get_setting("api_token", None),
            Err(Error::Locked)
        ));
        let secret = store.get_setting("api_token", Some(&key)).unwrap();
        assert!(secret.was_encrypted());
        assert_eq!(secret.as_bytes(), b"tok");

        let listed = store.list_settings().unwrap();
        assert_eq!(
            listed,
            vec![
                Setting {
                    key: "api_token".to_string(),
                    encrypted: true
                },
                Setting {
                    key: "theme".to_string(),
                    encrypted: false
                },
            ]
        );
    }

    #[test]
    fn test_setting_overwrite_and_delete() {
        let store = store();
        store.set_setting("lang", b"en").unwrap();
        store.set_setting("lang", b"de").unwrap();
        assert_eq!(store.get_setting("lang", None).unwrap().as_bytes(), b"de");
        assert_eq!(store.list_settings().unwrap().len(), 1);

        store.delete_setting("lang").unwrap();
        assert!(matches!(
            store.get_setting("lang", None),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.delete_setting("lang"), Err(Error::NotFound(_))));
        assert!(matches!(store.set_setting("", b"x"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_initialize_master_once() {
        let store = store();
        assert!(store.master_key_metadata().unwrap().is_none());

        let metadata = store
            .initialize_master("correct horse", &fast_params(), 6)
            .unwrap();
        assert_eq!(metadata.key_type, MASTER_KEY_TYPE);
        assert!(metadata.salt.as_bytes().len() >= 16);
        assert_eq!(store.master_key_metadata().unwrap(), Some(metadata));

        assert!(matches!(
            store.initialize_master("another one", &fast_params(), 6),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_initialize_master_rejects_short_passphrase() {
        let store = store();
        assert!(matches!(
            store.initialize_master("abc", &fast_params(), 6),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.initialize_master("", &fast_params(), 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.master_key_metadata().unwrap().is_none());
    }

    #[test]
    fn test_verifier_is_not_the_key() {
        let (store, key) = unlocked_store();
        let metadata = store.master_key_metadata().unwrap().unwrap();
        assert_ne!(metadata.verifier.as_slice(), key.as_bytes());
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let (store, _) = unlocked_store();
        assert!(matches!(
            store.verify_passphrase("wrong horse"),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_rotate_master_reencrypts_everything() {
        let (store, old_key) = unlocked_store();
        let id = store.create_entry(&old_key, example()).unwrap();
        store
            .set_secret_setting(&old_key, "token", b"abc")
            .unwrap();
        let old_meta = store.master_key_metadata().unwrap().unwrap();

        let new_key = store
            .rotate_master(&old_key, "battery staple", &fast_params(), 6)
            .unwrap();

        let new_meta = store.master_key_metadata().unwrap().unwrap();
        assert_ne!(new_meta.salt, old_meta.salt);
        assert_eq!(store.get_entry(&new_key, id).unwrap().password.expose(), "s3cr3t");
        assert_eq!(
            store.get_setting("token", Some(&new_key)).unwrap().as_bytes(),
            b"abc"
        );
        assert!(matches!(
            store.get_entry(&old_key, id),
            Err(Error::Integrity(_))
        ));
        assert!(store.verify_passphrase("battery staple").is_ok());
        assert!(store.verify_passphrase("correct horse").is_err());

        let rotated = store
            .audit()
            .query_by_action(AuditAction::MasterPasswordChanged)
            .unwrap();
        assert_eq!(rotated[0].details, "entries=1 settings=1");
        assert!(store.audit().verify_chain().unwrap().is_intact());
    }

    #[test]
    fn test_rotate_master_requires_current_key() {
        let (store, _) = unlocked_store();
        let stranger = VaultKey::from_bytes([1u8; 32]);
        assert!(matches!(
            store.rotate_master(&stranger, "battery staple", &fast_params(), 6),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_every_mutation_is_audited() {
        let (store, key) = unlocked_store();
        let id = store.create_entry(&key, example()).unwrap();
        store
            .update_entry(&key, id, EntryUpdate::new().title("Renamed"))
            .unwrap();
        store.set_setting("theme", b"dark").unwrap();
        store.delete_setting("theme").unwrap();
        store.delete_entry(id).unwrap();

        assert_eq!(
            actions(&store),
            vec![
                AuditAction::MasterKeyInitialized,
                AuditAction::EntryCreated,
                AuditAction::EntryUpdated,
                AuditAction::SettingChanged,
                AuditAction::SettingDeleted,
                AuditAction::EntryDeleted,
            ]
        );
    }

    #[test]
    fn test_backup_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("vault.db")).unwrap());
        let store = VaultStore::new(db.clone(), AuditLog::new(db, true), CipherScheme::default());
        store.set_setting("theme", b"dark").unwrap();

        let dest = dir.path().join("copy.db");
        store.backup_to(&dest).unwrap();

        assert!(dest.exists());
        assert_eq!(
            actions(&store),
            vec![AuditAction::SettingChanged, AuditAction::BackupCreated]
        );
    }
}
