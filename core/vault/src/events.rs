//! In-process event bus.
//!
//! Two independent registries: synchronous handlers run in subscription order
//! on the publisher's thread, asynchronous handlers run concurrently and the
//! publish future resolves once every one of them has finished. A handler is
//! registered on exactly one path; nothing inspects handler kind at dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use cryptosafe_common::{EntryId, Error, Result};

/// Why the clipboard slot was emptied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearReason {
    /// The expiry timer fired.
    Expired,
    /// The caller cleared it.
    Manual,
    /// The session locked.
    Locked,
}

impl ClearReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ClearReason::Expired => "expired",
            ClearReason::Manual => "manual",
            ClearReason::Locked => "locked",
        }
    }
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    EntryAdded { entry_id: EntryId, title: String },
    EntryUpdated { entry_id: EntryId, title: String },
    EntryDeleted { entry_id: EntryId },
    UserLoggedIn { user: String },
    UserLoggedOut { user: String },
    ClipboardCopied { entry_id: EntryId },
    ClipboardCleared { reason: ClearReason },
}

/// Subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    EntryAdded,
    EntryUpdated,
    EntryDeleted,
    UserLoggedIn,
    UserLoggedOut,
    ClipboardCopied,
    ClipboardCleared,
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Stamp a payload with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::EntryAdded { .. } => EventKind::EntryAdded,
            EventPayload::EntryUpdated { .. } => EventKind::EntryUpdated,
            EventPayload::EntryDeleted { .. } => EventKind::EntryDeleted,
            EventPayload::UserLoggedIn { .. } => EventKind::UserLoggedIn,
            EventPayload::UserLoggedOut { .. } => EventKind::UserLoggedOut,
            EventPayload::ClipboardCopied { .. } => EventKind::ClipboardCopied,
            EventPayload::ClipboardCleared { .. } => EventKind::ClipboardCleared,
        }
    }
}

/// Handler invoked on the publisher's thread.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Handler awaited by [`EventBus::publish_async`].
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

type Registry<H> = RwLock<HashMap<EventKind, Vec<Arc<H>>>>;

/// Same allocation, regardless of vtable.
fn same_handler<H: ?Sized>(a: &Arc<H>, b: &Arc<H>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn add<H: ?Sized>(registry: &Registry<H>, kind: EventKind, handler: Arc<H>) -> bool {
    let mut map = registry.write().unwrap_or_else(|p| p.into_inner());
    let handlers = map.entry(kind).or_default();
    if handlers.iter().any(|h| same_handler(h, &handler)) {
        return false;
    }
    handlers.push(handler);
    true
}

fn remove<H: ?Sized>(registry: &Registry<H>, kind: EventKind, handler: &Arc<H>) -> bool {
    let mut map = registry.write().unwrap_or_else(|p| p.into_inner());
    match map.get_mut(&kind) {
        Some(handlers) => {
            let before = handlers.len();
            handlers.retain(|h| !same_handler(h, handler));
            handlers.len() != before
        }
        None => false,
    }
}

/// Handlers for `kind`, copied out so they run without the registry lock.
fn snapshot<H: ?Sized>(registry: &Registry<H>, kind: EventKind) -> Vec<Arc<H>> {
    let map = registry.read().unwrap_or_else(|p| p.into_inner());
    map.get(&kind).cloned().unwrap_or_default()
}

fn aggregate(kind: EventKind, failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    warn!(?kind, failed = failures.len(), "Event handlers failed");
    Err(Error::Handler(failures.join("; ")))
}

/// Publish/subscribe fabric.
#[derive(Default)]
pub struct EventBus {
    sync_handlers: Registry<dyn EventHandler>,
    async_handlers: Registry<dyn AsyncEventHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler. Returns `false` if this handler is
    /// already subscribed to `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> bool {
        add(&self.sync_handlers, kind, handler)
    }

    /// Remove a synchronous handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Arc<dyn EventHandler>) -> bool {
        remove(&self.sync_handlers, kind, handler)
    }

    pub fn subscribe_async(&self, kind: EventKind, handler: Arc<dyn AsyncEventHandler>) -> bool {
        add(&self.async_handlers, kind, handler)
    }

    pub fn unsubscribe_async(
        &self,
        kind: EventKind,
        handler: &Arc<dyn AsyncEventHandler>,
    ) -> bool {
        remove(&self.async_handlers, kind, handler)
    }

    /// Number of handlers on both paths for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        snapshot(&self.sync_handlers, kind).len() + snapshot(&self.async_handlers, kind).len()
    }

    /// Deliver `event` to every synchronous handler in subscription order.
    ///
    /// All handlers run even if an earlier one fails; side effects of
    /// handlers that already ran are not undone.
    ///
    /// # Errors
    /// - `Handler` listing every failure
    pub fn publish(&self, event: &Event) -> Result<()> {
        let kind = event.kind();
        let handlers = snapshot(&self.sync_handlers, kind);
        debug!(?kind, handlers = handlers.len(), "Publishing event");

        let failures = handlers
            .iter()
            .filter_map(|h| EventHandler::handle(h.as_ref(), event).err())
            .map(|e| e.to_string())
            .collect();
        aggregate(kind, failures)
    }

    /// Deliver `event` to every asynchronous handler concurrently and wait
    /// for all of them.
    ///
    /// # Errors
    /// - `Handler` listing every failure
    pub async fn publish_async(&self, event: &Event) -> Result<()> {
        let kind = event.kind();
        let handlers = snapshot(&self.async_handlers, kind);
        debug!(?kind, handlers = handlers.len(), "Publishing event concurrently");

        let results = join_all(
            handlers
                .iter()
                .map(|h| AsyncEventHandler::handle(h.as_ref(), event)),
        )
        .await;
        let failures = results
            .into_iter()
            .filter_map(|r| r.err())
            .map(|e| e.to_string())
            .collect();
        aggregate(kind, failures)
    }
}
