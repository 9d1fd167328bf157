/// Subscription registry - message-type tag to handler fan-out table
///
/// Maps each type tag (or the wildcard "*") to the handlers registered for it,
/// preserving registration order. Registration has set semantics: the same
/// handler value (same Arc allocation) registered twice under one type is
/// stored once. Structurally identical but distinct closures are distinct
/// registrations, which is why handlers must be stable references for the
/// unsubscribe path to work.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::channel::message::ChannelMessage;

/// Handler callback invoked for each matching inbound message
pub type Handler = Arc<dyn Fn(&ChannelMessage) + Send + Sync + 'static>;

/// Registry of (type, handler) pairs
pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Register a handler under a type tag
    ///
    /// Returns false when the exact pair was already present (no-op).
    pub fn subscribe(&self, kind: &str, handler: Handler) -> bool {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        let entries = handlers.entry(kind.to_string()).or_default();

        if entries.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }

        entries.push(handler);
        true
    }

    /// Remove a (type, handler) pair if present
    ///
    /// No-op when absent. The type entry itself is dropped once its last
    /// handler is removed, so the table does not grow unboundedly over a long
    /// session.
    pub fn unsubscribe(&self, kind: &str, handler: &Handler) -> bool {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");

        let Some(entries) = handlers.get_mut(kind) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = entries.len() < before;

        if entries.is_empty() {
            handlers.remove(kind);
        }

        removed
    }

    /// Snapshot the handlers for a type tag, in registration order
    ///
    /// Returns clones so the lock is never held while handlers run.
    pub fn handlers_for(&self, kind: &str) -> Vec<Handler> {
        self.handlers
            .read()
            .expect("registry lock poisoned")
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of type entries currently registered
    pub fn type_count(&self) -> usize {
        self.handlers.read().expect("registry lock poisoned").len()
    }

    /// Total number of (type, handler) pairs
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|entries| entries.len())
            .sum()
    }
}

// ============================================================================
// SUBSCRIPTION HANDLE
// ============================================================================

/// Release handle for a single (type, handler) registration
///
/// Release is idempotent, and the handle releases itself on drop so a
/// subscription's lifetime follows its owner's scope. Call `detach` to keep
/// the registration alive past the handle.
pub struct Subscription {
    registry: Weak<SubscriptionRegistry>,
    kind: String,
    handler: Handler,
    released: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<SubscriptionRegistry>, kind: String, handler: Handler) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            kind,
            handler,
            released: AtomicBool::new(false),
        }
    }

    /// Remove exactly this (type, handler) pair; safe to call repeatedly
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.kind, &self.handler);
        }
    }

    /// Keep the registration alive after this handle is dropped
    pub fn detach(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Type tag this handle was registered under
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
