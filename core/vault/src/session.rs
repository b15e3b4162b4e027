//! Session gate.
//!
//! The session owns the working key while unlocked and is the only way to
//! reach store operations. All mutable session state lives in one struct
//! behind one async mutex; the clipboard and inactivity timers take the same
//! mutex before acting, so an expiry can never interleave with an unlock,
//! lock or copy.
//!
//! Events are published after the mutex is released, so handlers may call
//! back into the session.
//!
//! SQLite and key derivation block, so every store call runs on the blocking
//! pool while the session mutex is held across the await.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::ChainReport;
use crate::config::SessionPolicy;
use crate::events::{ClearReason, Event, EventBus, EventPayload};
use crate::models::{
    AuditAction, AuditRecord, DecryptedEntry, EntrySummary, EntryUpdate, NewEntry, Setting,
    SettingValue,
};
use crate::store::VaultStore;
use crate::timer::TimerSlot;
use cryptosafe_common::{EntryId, Error, Result, SecretString};
use cryptosafe_crypto::{KdfParams, VaultKey};

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Locked,
    Unlocked,
}

/// Why a session was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Explicit,
    Inactivity,
    Shutdown,
}

impl LockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LockReason::Explicit => "explicit",
            LockReason::Inactivity => "inactivity",
            LockReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ClipboardSlot {
    content: SecretString,
    entry_id: EntryId,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    user: Option<String>,
    session_id: Option<Uuid>,
    /// Present exactly while unlocked. Zeroized on drop.
    key: Option<VaultKey>,
    clipboard: Option<ClipboardSlot>,
    /// Inactivity deadline; activity moves it, the watcher re-reads it.
    deadline: Option<Instant>,
    clipboard_timer: TimerSlot,
    inactivity_timer: TimerSlot,
}

struct Shared {
    inner: Mutex<Inner>,
    store: Arc<VaultStore>,
    events: Arc<EventBus>,
    policy: SessionPolicy,
    kdf: KdfParams,
}

impl Shared {
    fn touch(&self, inner: &mut Inner) {
        inner.deadline = Some(Instant::now() + self.policy.inactivity_timeout);
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&VaultStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(storage_join_error)?
    }

    /// Record one audit event off the runtime.
    async fn record(
        &self,
        action: AuditAction,
        entry_id: Option<EntryId>,
        details: impl Into<String>,
    ) -> Result<()> {
        let details = details.into();
        self.blocking(move |store| {
            store.audit().append(action, Utc::now(), entry_id, &details)?;
            Ok(())
        })
        .await
    }

    /// Move to Locked while the session mutex is held.
    ///
    /// State changes first; audit failures are collected and returned with
    /// the events to publish once the mutex is released.
    async fn lock_held(
        &self,
        inner: &mut Inner,
        reason: LockReason,
    ) -> (Vec<Event>, Option<Error>) {
        if inner.state == SessionState::Locked {
            return (Vec::new(), None);
        }

        inner.key = None;
        inner.clipboard_timer.cancel();
        inner.inactivity_timer.cancel();
        let clipboard = inner.clipboard.take();
        inner.state = SessionState::Locked;
        inner.deadline = None;
        inner.session_id = None;
        let user = inner.user.take().unwrap_or_default();
        let cleared = clipboard.map(|slot| slot.entry_id);

        let mut events = Vec::new();
        if cleared.is_some() {
            events.push(Event::new(EventPayload::ClipboardCleared {
                reason: ClearReason::Locked,
            }));
        }
        events.push(Event::new(EventPayload::UserLoggedOut { user }));

        let recorded = self
            .blocking(move |store| {
                let audit = store.audit();
                let now = Utc::now();
                let mut failure = None;
                if let Some(entry_id) = cleared {
                    if let Err(e) = audit.append(
                        AuditAction::ClipboardClear,
                        now,
                        Some(entry_id),
                        "reason=locked",
                    ) {
                        failure = Some(e);
                    }
                }
                if let Err(e) = audit.append(
                    AuditAction::SessionLocked,
                    now,
                    None,
                    &format!("reason={}", reason),
                ) {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
                Ok(failure)
            })
            .await;
        let failure = recorded.unwrap_or_else(Some);

        info!(reason = %reason, "Session locked");
        (events, failure)
    }

    /// Publish on both paths. Failures are logged; the change that caused
    /// the event is already committed.
    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.publish(&event) {
            warn!(kind = ?event.kind(), error = %e, "Event handler failed");
        }
        if let Err(e) = self.events.publish_async(&event).await {
            warn!(kind = ?event.kind(), error = %e, "Async event handler failed");
        }
    }

    async fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

fn arm_inactivity(weak: Weak<Shared>, inner: &mut Inner, timeout: Duration) {
    inner.deadline = Some(Instant::now() + timeout);
    inner
        .inactivity_timer
        .arm(move |generation| watch_inactivity(weak, generation));
}

/// Sleep until the deadline, then re-check it: activity may have moved it.
async fn watch_inactivity(weak: Weak<Shared>, generation: u64) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock().await;
        if !inner.inactivity_timer.is_current(generation) {
            return;
        }
        let Some(deadline) = inner.deadline else {
            return;
        };

        if Instant::now() >= deadline {
            inner.inactivity_timer.take_if_current(generation);
            let (events, failure) = shared
                .lock_held(&mut inner, LockReason::Inactivity)
                .await;
            drop(inner);
            if let Some(e) = failure {
                error!(error = %e, "Failed to record inactivity lock");
            }
            shared.emit_all(events).await;
            return;
        }

        drop(inner);
        drop(shared);
        tokio::time::sleep_until(deadline).await;
    }
}

async fn expire_clipboard(weak: Weak<Shared>, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut inner = shared.inner.lock().await;
    if !inner.clipboard_timer.take_if_current(generation) {
        return;
    }
    let Some(slot) = inner.clipboard.take() else {
        return;
    };

    let entry_id = slot.entry_id;
    drop(slot);
    if let Err(e) = shared
        .record(AuditAction::ClipboardClear, Some(entry_id), "reason=expired")
        .await
    {
        error!(error = %e, "Failed to record clipboard expiry");
    }
    drop(inner);

    debug!("Clipboard expired");
    shared
        .emit(Event::new(EventPayload::ClipboardCleared {
            reason: ClearReason::Expired,
        }))
        .await;
}

fn join_error(err: JoinError) -> Error {
    Error::Crypto(format!("Key derivation task failed: {}", err))
}

fn storage_join_error(err: JoinError) -> Error {
    Error::Storage(format!("Storage task failed: {}", err))
}

/// Gate over a [`VaultStore`].
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a locked session.
    ///
    /// `kdf` applies to keys derived for setup and password changes; unlock
    /// always uses the parameters stored with the master key.
    pub fn new(
        store: Arc<VaultStore>,
        events: Arc<EventBus>,
        policy: SessionPolicy,
        kdf: KdfParams,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                store,
                events,
                policy,
                kdf,
            }),
        }
    }

    /// Bus used for this session's notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.shared.policy
    }

    /// Whether a master key has been set up.
    ///
    /// Reads the database on the calling thread.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.shared.store.master_key_metadata()?.is_some())
    }

    /// First-run master key setup. The session stays locked.
    ///
    /// # Errors
    /// - `AlreadyExists` if the vault is already initialized
    /// - `InvalidInput` if the passphrase is shorter than the policy minimum
    pub async fn initialize(&self, passphrase: &str) -> Result<()> {
        let store = self.shared.store.clone();
        let kdf = self.shared.kdf.clone();
        let min_len = self.shared.policy.min_passphrase_len;
        let passphrase = Zeroizing::new(passphrase.to_string());

        tokio::task::spawn_blocking(move || store.initialize_master(&passphrase, &kdf, min_len))
            .await
            .map_err(join_error)??;
        Ok(())
    }

    /// Unlock with the master passphrase.
    ///
    /// # Postconditions
    /// - On success: Unlocked, `LoginSucceeded` recorded, inactivity timer
    ///   armed, `UserLoggedIn` published
    /// - On mismatch: still Locked, exactly one `LoginFailed` recorded
    /// - Already unlocked: no-op that resets the inactivity deadline
    ///
    /// # Errors
    /// - `AuthenticationFailed` on a wrong passphrase
    /// - `NotFound` if the vault has not been initialized
    /// - `InvalidInput` for an empty passphrase
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        self.unlock_bounded(passphrase, None).await
    }

    /// [`unlock`](Self::unlock) with a bound on key derivation time.
    ///
    /// # Errors
    /// - `Timeout` if derivation does not finish within `limit`; the session
    ///   stays locked and nothing is recorded
    pub async fn unlock_with_timeout(&self, passphrase: &str, limit: Duration) -> Result<()> {
        self.unlock_bounded(passphrase, Some(limit)).await
    }

    async fn unlock_bounded(&self, passphrase: &str, limit: Option<Duration>) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state == SessionState::Unlocked {
            shared.touch(&mut inner);
            debug!("Unlock on an unlocked session; deadline reset");
            return Ok(());
        }

        let store = shared.store.clone();
        let passphrase = Zeroizing::new(passphrase.to_string());
        let derivation = tokio::task::spawn_blocking(move || store.verify_passphrase(&passphrase));
        let joined = match limit {
            Some(limit) => tokio::time::timeout(limit, derivation).await.map_err(|_| {
                warn!(?limit, "Key derivation timed out");
                Error::Timeout(format!("Key derivation exceeded {:?}", limit))
            })?,
            None => derivation.await,
        };

        let key = match joined.map_err(join_error)? {
            Ok(key) => key,
            Err(Error::AuthenticationFailed) => {
                if let Err(e) = shared
                    .record(AuditAction::LoginFailed, None, "unlock rejected")
                    .await
                {
                    error!(error = %e, "Failed to record failed login");
                }
                warn!("Unlock rejected");
                return Err(Error::AuthenticationFailed);
            }
            Err(other) => return Err(other),
        };

        let user = shared.policy.user.clone();
        shared
            .record(AuditAction::LoginSucceeded, None, format!("user={}", user))
            .await?;

        inner.key = Some(key);
        inner.state = SessionState::Unlocked;
        inner.user = Some(user.clone());
        inner.session_id = Some(Uuid::new_v4());
        arm_inactivity(
            Arc::downgrade(shared),
            &mut inner,
            shared.policy.inactivity_timeout,
        );
        drop(inner);

        info!(user = %user, "Session unlocked");
        shared
            .emit(Event::new(EventPayload::UserLoggedIn { user }))
            .await;
        Ok(())
    }

    /// Lock explicitly. Locking a locked session is a no-op.
    ///
    /// The key is zeroized and the clipboard cleared even if recording the
    /// lock fails; that failure is returned afterwards.
    pub async fn lock(&self) -> Result<()> {
        self.lock_with(LockReason::Explicit).await
    }

    /// Lock for process exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.lock_with(LockReason::Shutdown).await
    }

    async fn lock_with(&self, reason: LockReason) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let (events, failure) = self.shared.lock_held(&mut inner, reason).await;
        drop(inner);

        self.shared.emit_all(events).await;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    pub async fn is_locked(&self) -> bool {
        self.state().await == SessionState::Locked
    }

    pub async fn current_user(&self) -> Option<String> {
        self.shared.inner.lock().await.user.clone()
    }

    /// Identifier of the current unlocked session.
    pub async fn session_id(&self) -> Option<Uuid> {
        self.shared.inner.lock().await.session_id
    }

    /// Run `op` with the working key, resetting the inactivity deadline.
    ///
    /// The mutex stays held until `op` finishes, so a lock cannot drop the
    /// key under a running store call.
    async fn gated<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&VaultStore, &VaultKey) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        if inner.state != SessionState::Unlocked {
            return Err(Error::Locked);
        }
        self.shared.touch(inner);
        let key = inner.key.clone().ok_or(Error::Locked)?;
        self.shared.blocking(move |store| op(store, &key)).await
    }

    // ----- entries -----

    pub async fn create_entry(&self, entry: NewEntry) -> Result<EntryId> {
        let title = entry.title.trim().to_string();
        let id = self
            .gated(move |store, key| store.create_entry(key, entry))
            .await?;
        self.shared
            .emit(Event::new(EventPayload::EntryAdded {
                entry_id: id,
                title,
            }))
            .await;
        Ok(id)
    }

    pub async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<()> {
        let title = self
            .gated(move |store, key| {
                store.update_entry(key, id, update)?;
                Ok(store.get_summary(id)?.title)
            })
            .await?;
        self.shared
            .emit(Event::new(EventPayload::EntryUpdated {
                entry_id: id,
                title,
            }))
            .await;
        Ok(())
    }

    pub async fn delete_entry(&self, id: EntryId) -> Result<()> {
        self.gated(move |store, _| store.delete_entry(id)).await?;
        self.shared
            .emit(Event::new(EventPayload::EntryDeleted { entry_id: id }))
            .await;
        Ok(())
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<DecryptedEntry> {
        self.gated(move |store, key| store.get_entry(key, id)).await
    }

    pub async fn list_entries(&self) -> Result<Vec<EntrySummary>> {
        self.gated(|store, _| store.list_entries()).await
    }

    pub async fn search_entries(&self, query: &str) -> Result<Vec<EntrySummary>> {
        let query = query.to_string();
        self.gated(move |store, _| store.search_entries(&query))
            .await
    }

    // ----- settings -----

    pub async fn set_setting(&self, name: &str, value: &[u8]) -> Result<()> {
        let name = name.to_string();
        let value = value.to_vec();
        self.gated(move |store, _| store.set_setting(&name, &value))
            .await
    }

    pub async fn set_secret_setting(&self, name: &str, value: &[u8]) -> Result<()> {
        let name = name.to_string();
        let value = Zeroizing::new(value.to_vec());
        self.gated(move |store, key| store.set_secret_setting(key, &name, &value))
            .await
    }

    pub async fn get_setting(&self, name: &str) -> Result<SettingValue> {
        let name = name.to_string();
        self.gated(move |store, key| store.get_setting(&name, Some(key)))
            .await
    }

    pub async fn delete_setting(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.gated(move |store, _| store.delete_setting(&name))
            .await
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>> {
        self.gated(|store, _| store.list_settings()).await
    }

    // ----- master key -----

    /// Replace the master passphrase and re-encrypt the vault.
    ///
    /// # Errors
    /// - `Locked` while locked
    /// - `AuthenticationFailed` if `current` is wrong (recorded as
    ///   `LoginFailed`)
    /// - `InvalidInput` if `new` is shorter than the policy minimum
    pub async fn change_master_password(&self, current: &str, new: &str) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state != SessionState::Unlocked {
            return Err(Error::Locked);
        }
        shared.touch(&mut inner);

        let store = shared.store.clone();
        let kdf = shared.kdf.clone();
        let min_len = shared.policy.min_passphrase_len;
        let current = Zeroizing::new(current.to_string());
        let new = Zeroizing::new(new.to_string());

        let rotated = tokio::task::spawn_blocking(move || {
            let verified = store.verify_passphrase(&current)?;
            store.rotate_master(&verified, &new, &kdf, min_len)
        })
        .await
        .map_err(join_error)?;

        match rotated {
            Ok(key) => {
                inner.key = Some(key);
                info!("Master password changed for active session");
                Ok(())
            }
            Err(Error::AuthenticationFailed) => {
                if let Err(e) = shared
                    .record(AuditAction::LoginFailed, None, "password change rejected")
                    .await
                {
                    error!(error = %e, "Failed to record failed login");
                }
                warn!("Password change rejected");
                Err(Error::AuthenticationFailed)
            }
            Err(other) => Err(other),
        }
    }

    // ----- clipboard -----

    /// Put an entry's password in the clipboard slot and (re)start the
    /// expiry timer. Returns when the slot will be cleared.
    pub async fn copy_secret(&self, id: EntryId) -> Result<DateTime<Utc>> {
        let timeout = self.shared.policy.clipboard_timeout;
        let lifetime = chrono::Duration::from_std(timeout)
            .map_err(|e| Error::InvalidInput(format!("Clipboard timeout: {}", e)))?;
        let weak = Arc::downgrade(&self.shared);

        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        if inner.state != SessionState::Unlocked {
            return Err(Error::Locked);
        }
        self.shared.touch(inner);
        let key = inner.key.clone().ok_or(Error::Locked)?;

        let entry = self
            .shared
            .blocking(move |store| {
                let entry = store.get_entry(&key, id)?;
                store
                    .audit()
                    .append(AuditAction::ClipboardCopy, Utc::now(), Some(id), "")?;
                Ok(entry)
            })
            .await?;

        let expires_at = Utc::now() + lifetime;
        inner.clipboard = Some(ClipboardSlot {
            content: entry.password,
            entry_id: id,
            expires_at,
        });
        inner.clipboard_timer.arm(move |generation| async move {
            tokio::time::sleep(timeout).await;
            expire_clipboard(weak, generation).await;
        });
        drop(guard);

        debug!(entry_id = %id, "Secret copied to clipboard");
        self.shared
            .emit(Event::new(EventPayload::ClipboardCopied { entry_id: id }))
            .await;
        Ok(expires_at)
    }

    /// Current clipboard content, if any.
    pub async fn clipboard(&self) -> Option<SecretString> {
        self.shared
            .inner
            .lock()
            .await
            .clipboard
            .as_ref()
            .map(|slot| slot.content.clone())
    }

    /// When the clipboard slot will be cleared, if it holds anything.
    pub async fn clipboard_expires_at(&self) -> Option<DateTime<Utc>> {
        self.shared
            .inner
            .lock()
            .await
            .clipboard
            .as_ref()
            .map(|slot| slot.expires_at)
    }

    /// Clear the clipboard slot now. Returns `false` if it was already empty.
    pub async fn clear_clipboard(&self) -> Result<bool> {
        let mut inner = self.shared.inner.lock().await;
        inner.clipboard_timer.cancel();
        let Some(slot) = inner.clipboard.take() else {
            return Ok(false);
        };
        let entry_id = slot.entry_id;
        drop(slot);

        let recorded = self
            .shared
            .record(AuditAction::ClipboardClear, Some(entry_id), "reason=manual")
            .await;
        drop(inner);

        self.shared
            .emit(Event::new(EventPayload::ClipboardCleared {
                reason: ClearReason::Manual,
            }))
            .await;
        recorded.map(|_| true)
    }

    // ----- audit and maintenance -----

    pub async fn verify_audit_chain(&self) -> Result<ChainReport> {
        self.gated(|store, _| store.audit().verify_chain()).await
    }

    pub async fn audit_range(&self, from_id: i64, limit: usize) -> Result<Vec<AuditRecord>> {
        self.gated(move |store, _| store.audit().list_range(from_id, limit))
            .await
    }

    pub async fn audit_for_entry(&self, id: EntryId) -> Result<Vec<AuditRecord>> {
        self.gated(move |store, _| store.audit().query_by_entry(id))
            .await
    }

    pub async fn audit_by_action(&self, action: AuditAction) -> Result<Vec<AuditRecord>> {
        self.gated(move |store, _| store.audit().query_by_action(action))
            .await
    }

    /// Write a backup copy of the vault database.
    pub async fn backup_to(&self, dest: impl AsRef<Path>) -> Result<PathBuf> {
        let dest = dest.as_ref().to_path_buf();
        self.gated(move |store, _| {
            store.backup_to(&dest)?;
            Ok(dest)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use cryptosafe_crypto::CipherScheme;
    use cryptosafe_storage::Database;

    const PASSPHRASE: &str = "correct horse";

    fn fast_params() -> KdfParams {
        KdfParams::argon2id(8 * 1024, 1, 1)
    }

    fn session_with(policy: SessionPolicy, kdf: KdfParams) -> SessionManager {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let audit = AuditLog::new(db.clone(), true);
        let store = Arc::new(VaultStore::new(db, audit, CipherScheme::default()));
        SessionManager::new(store, Arc::new(EventBus::new()), policy, kdf)
    }

    async fn initialized() -> SessionManager {
        let session = session_with(SessionPolicy::default(), fast_params());
        session.initialize(PASSPHRASE).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_starts_locked_and_gates_operations() {
        let session = initialized().await;
        assert!(session.is_locked().await);
        assert_eq!(session.current_user().await, None);

        assert!(matches!(session.list_entries().await, Err(Error::Locked)));
        assert!(matches!(
            session.get_entry(EntryId::new(1).unwrap()).await,
            Err(Error::Locked)
        ));
        assert!(matches!(
            session.set_setting("theme", b"dark").await,
            Err(Error::Locked)
        ));
        assert!(matches!(
            session.copy_secret(EntryId::new(1).unwrap()).await,
            Err(Error::Locked)
        ));
    }

    #[tokio::test]
    async fn test_unlock_and_lock() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();

        assert_eq!(session.state().await, SessionState::Unlocked);
        assert_eq!(session.current_user().await.as_deref(), Some("local"));
        assert!(session.session_id().await.is_some());
        assert!(session.list_entries().await.unwrap().is_empty());

        session.lock().await.unwrap();
        assert!(session.is_locked().await);
        assert_eq!(session.session_id().await, None);
        assert!(matches!(session.list_entries().await, Err(Error::Locked)));
    }

    #[tokio::test]
    async fn test_unlock_twice_is_noop() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        let id = session.session_id().await;

        // Wrong passphrase is not even checked once unlocked.
        session.unlock("anything").await.unwrap();
        assert_eq!(session.session_id().await, id);

        let store = session.shared.store.clone();
        assert_eq!(
            store
                .audit()
                .query_by_action(AuditAction::LoginSucceeded)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_lock_twice_is_noop() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        session.lock().await.unwrap();
        session.lock().await.unwrap();

        let locks = session
            .shared
            .store
            .audit()
            .query_by_action(AuditAction::SessionLocked)
            .unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].details, "reason=explicit");
    }

    #[tokio::test]
    async fn test_unlock_uninitialized_vault() {
        let session = session_with(SessionPolicy::default(), fast_params());
        assert!(!session.is_initialized().unwrap());
        assert!(matches!(
            session.unlock(PASSPHRASE).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_enforces_policy() {
        let session = session_with(SessionPolicy::default(), fast_params());
        assert!(matches!(
            session.initialize("short").await,
            Err(Error::InvalidInput(_))
        ));
        session.initialize(PASSPHRASE).await.unwrap();
        assert!(session.is_initialized().unwrap());
        assert!(matches!(
            session.initialize(PASSPHRASE).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_timeout() {
        let session = session_with(SessionPolicy::default(), KdfParams::argon2id(32 * 1024, 2, 1));
        session.initialize(PASSPHRASE).await.unwrap();

        let result = session
            .unlock_with_timeout(PASSPHRASE, Duration::from_millis(1))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(session.is_locked().await);
    }

    #[tokio::test]
    async fn test_change_master_password() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        let id = session
            .create_entry(NewEntry::new("Mail", SecretString::from("pw1")))
            .await
            .unwrap();

        assert!(matches!(
            session
                .change_master_password("wrong horse", "battery staple")
                .await,
            Err(Error::AuthenticationFailed)
        ));
        session
            .change_master_password(PASSPHRASE, "battery staple")
            .await
            .unwrap();

        // The session keeps working with the rotated key.
        assert_eq!(session.get_entry(id).await.unwrap().password.expose(), "pw1");

        session.lock().await.unwrap();
        assert!(session.unlock(PASSPHRASE).await.is_err());
        session.unlock("battery staple").await.unwrap();
        assert_eq!(session.get_entry(id).await.unwrap().password.expose(), "pw1");
    }

    #[tokio::test]
    async fn test_lock_clears_clipboard() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        let id = session
            .create_entry(NewEntry::new("Mail", SecretString::from("pw1")))
            .await
            .unwrap();

        session.copy_secret(id).await.unwrap();
        assert_eq!(session.clipboard().await.unwrap().expose(), "pw1");
        assert!(session.clipboard_expires_at().await.is_some());

        session.lock().await.unwrap();
        assert!(session.clipboard().await.is_none());

        let clears = session
            .shared
            .store
            .audit()
            .query_by_action(AuditAction::ClipboardClear)
            .unwrap();
        assert_eq!(clears.len(), 1);
        assert_eq!(clears[0].details, "reason=locked");
    }

    #[tokio::test]
    async fn test_manual_clipboard_clear() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        let id = session
            .create_entry(NewEntry::new("Mail", SecretString::from("pw1")))
            .await
            .unwrap();

        session.copy_secret(id).await.unwrap();
        assert!(session.clear_clipboard().await.unwrap());
        assert!(!session.clear_clipboard().await.unwrap());
        assert!(session.clipboard().await.is_none());
    }

    #[tokio::test]
    async fn test_inactivity_locks_session() {
        let policy = SessionPolicy {
            inactivity_timeout: Duration::from_millis(80),
            ..SessionPolicy::default()
        };
        let session = session_with(policy, fast_params());
        session.initialize(PASSPHRASE).await.unwrap();
        session.unlock(PASSPHRASE).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(session.is_locked().await);

        let locks = session
            .shared
            .store
            .audit()
            .query_by_action(AuditAction::SessionLocked)
            .unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].details, "reason=inactivity");
    }

    #[tokio::test]
    async fn test_activity_postpones_auto_lock() {
        let policy = SessionPolicy {
            inactivity_timeout: Duration::from_millis(200),
            ..SessionPolicy::default()
        };
        let session = session_with(policy, fast_params());
        session.initialize(PASSPHRASE).await.unwrap();
        session.unlock(PASSPHRASE).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        session.list_entries().await.unwrap();
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(!session.is_locked().await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(session.is_locked().await);
    }

    #[tokio::test]
    async fn test_shutdown_locks() {
        let session = initialized().await;
        session.unlock(PASSPHRASE).await.unwrap();
        session.shutdown().await.unwrap();

        assert!(session.is_locked().await);
        let locks = session
            .shared
            .store
            .audit()
            .query_by_action(AuditAction::SessionLocked)
            .unwrap();
        assert_eq!(locks[0].details, "reason=shutdown");
    }
}
