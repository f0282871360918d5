//! Dispatch Registry
//!
//! Maps watch keys to frame handlers. Shared by the reader loop (lookups)
//! and every API caller (mutations) behind one read/write lock. Handlers
//! are cloned out of the map before they run, so no handler ever executes
//! while the lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::subscription::WatchKey;
use crate::infrastructure::okx::messages::InboundFrame;

/// Callback invoked with every frame routed to its key.
pub type FrameHandler = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

/// Identifies one registration, so a caller only removes its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

struct Entry {
    id: RegistrationId,
    handler: FrameHandler,
}

/// Watch key to handler map.
#[derive(Default)]
pub struct DispatchRegistry {
    entries: RwLock<HashMap<WatchKey, Entry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl DispatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File `handler` under `key`, replacing any previous handler.
    pub fn register(&self, key: WatchKey, handler: FrameHandler) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().insert(key, Entry { id, handler });
        id
    }

    /// Remove whatever is filed under `key`. Unknown keys are a no-op.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, key: &WatchKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove the entry under `key` only if it is still registration `id`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister_if(&self, key: &WatchKey, id: RegistrationId) -> bool {
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Handler filed under `key`.
    #[must_use]
    pub fn get(&self, key: &WatchKey) -> Option<FrameHandler> {
        self.entries
            .read()
            .get(key)
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// Whether anything is filed under `key`.
    #[must_use]
    pub fn contains(&self, key: &WatchKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Route one frame.
    ///
    /// Looks up the topic handler for the frame's echoed argument, then,
    /// independently, the handler for its event name. Returns how many
    /// handlers ran (0, 1 or 2).
    pub fn dispatch(&self, frame: &InboundFrame) -> usize {
        let topic = frame
            .arg
            .as_ref()
            .and_then(|arg| self.get(&WatchKey::topic(arg)));
        let event = frame
            .event
            .as_deref()
            .filter(|event| !event.is_empty())
            .and_then(|event| self.get(&WatchKey::event(event)));

        let mut invoked = 0;
        for handler in [topic, event].into_iter().flatten() {
            handler(frame);
            invoked += 1;
        }
        invoked
    }
}
