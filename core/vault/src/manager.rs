//! Vault manager: wires storage, audit, events and the session together.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::audit::AuditLog;
use crate::config::CoreConfig;
use crate::events::EventBus;
use crate::session::SessionManager;
use crate::store::VaultStore;
use cryptosafe_common::{Error, Result};
use cryptosafe_storage::Database;

/// Entry point for front ends.
pub struct VaultManager {
    config: CoreConfig,
    events: Arc<EventBus>,
}

impl VaultManager {
    /// Create a manager for a resolved configuration.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration does not validate
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            events: Arc::new(EventBus::new()),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Bus shared by every session this manager opens.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Whether the configured vault exists and has a master key.
    pub fn vault_exists(&self) -> Result<bool> {
        if !self.config.db_path.is_file() {
            return Ok(false);
        }
        self.open()?.is_initialized()
    }

    /// Open (creating if needed) the configured database and return a
    /// locked session over it.
    ///
    /// # Postconditions
    /// - Parent directories of the database path exist
    /// - Schema is at the current version
    ///
    /// # Errors
    /// - `Io` if the parent directory cannot be created
    /// - `Storage` if the database cannot be opened or has an unknown schema
    pub fn open(&self) -> Result<SessionManager> {
        let path = &self.config.db_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open_with_retry(path, self.config.retry.clone())?;
        info!(
            path = %path.display(),
            environment = %self.config.environment,
            "Vault database opened"
        );
        Ok(self.session_over(db))
    }

    /// Open a throwaway in-memory vault.
    pub fn open_in_memory(&self) -> Result<SessionManager> {
        let db = Database::open_in_memory()?;
        Ok(self.session_over(db))
    }

    /// Copy an existing vault file to `dest` without opening a session.
    ///
    /// # Errors
    /// - `NotFound` if the configured vault does not exist
    /// - `AlreadyExists` if `dest` exists
    pub fn backup_file(&self, dest: &Path) -> Result<()> {
        if !self.config.db_path.is_file() {
            return Err(Error::NotFound(format!(
                "Vault not found: {}",
                self.config.db_path.display()
            )));
        }
        let db = Database::open_with_retry(&self.config.db_path, self.config.retry.clone())?;
        db.backup_to(dest)
    }

    fn session_over(&self, db: Database) -> SessionManager {
        let db = Arc::new(db);
        let audit = AuditLog::new(db.clone(), self.config.audit_signing);
        let store = Arc::new(VaultStore::new(db, audit, self.config.cipher));
        SessionManager::new(
            store,
            self.events.clone(),
            self.config.session.clone(),
            self.config.kdf.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use cryptosafe_crypto::KdfParams;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> CoreConfig {
        CoreConfig::for_environment(
            Environment::Development,
            Some(dir.path().join("nested").join("vault.db")),
        )
        .with_kdf(KdfParams::argon2id(8 * 1024, 1, 1))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CoreConfig::default().with_kdf(KdfParams::argon2id(1, 0, 0));
        assert!(VaultManager::new(config).is_err());
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let manager = VaultManager::new(config_in(&dir)).unwrap();
        assert!(!manager.vault_exists().unwrap());

        let session = manager.open().unwrap();
        assert!(manager.config().db_path.is_file());
        assert!(!manager.vault_exists().unwrap());
        assert!(session.is_locked().await);

        session.initialize("correct horse").await.unwrap();
        assert!(manager.vault_exists().unwrap());
    }

    #[tokio::test]
    async fn test_reopen_keeps_master_key() {
        let dir = TempDir::new().unwrap();
        let manager = VaultManager::new(config_in(&dir)).unwrap();

        let session = manager.open().unwrap();
        session.initialize("correct horse").await.unwrap();
        drop(session);

        let session = manager.open().unwrap();
        assert!(session.is_initialized().unwrap());
        session.unlock("correct horse").await.unwrap();
    }

    #[test]
    fn test_backup_file_requires_vault() {
        let dir = TempDir::new().unwrap();
        let manager = VaultManager::new(config_in(&dir)).unwrap();
        let dest = dir.path().join("backup.db");
        assert!(matches!(
            manager.backup_file(&dest),
            Err(Error::NotFound(_))
        ));

        manager.open().unwrap();
        manager.backup_file(&dest).unwrap();
        assert!(dest.is_file());
    }
}
