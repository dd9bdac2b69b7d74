//! Connection listeners
//!
//! Callbacks registered on a remote reference for one kind of transition.
//! A listener belongs to whoever registered it: firing submits the callback
//! as a task on the owner's scheduler and never runs it on the caller's
//! thread, so a listener can touch its owner's state freely.

use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;
use types::FarRefId;

/// Listener callback; receives the id of the reference whose state changed
pub type Listener = Arc<dyn Fn(FarRefId) + Send + Sync>;

struct Entry {
    id: u64,
    owner: Scheduler,
    callback: Listener,
}

/// Listeners for one transition kind
pub struct ListenerRegistry {
    kind: &'static str,
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `callback` to run on `owner`
    pub fn add(self: &Arc<Self>, owner: Scheduler, callback: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, owner, callback });
        ListenerHandle {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Submit every registered callback to its owner
    pub fn fire(&self, reference: FarRefId) {
        let targets: Vec<(Scheduler, Listener)> = self
            .entries
            .lock()
            .iter()
            .map(|entry| (entry.owner.clone(), Arc::clone(&entry.callback)))
            .collect();

        for (owner, callback) in targets {
            if let Err(e) = owner.submit(move || callback(reference)) {
                warn!(
                    far_ref = %reference,
                    listener = self.kind,
                    error = %e,
                    "Listener owner no longer running"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration token; [`cancel`](ListenerHandle::cancel) removes the listener
#[derive(Debug)]
pub struct ListenerHandle {
    registry: Weak<ListenerRegistry>,
    id: u64,
}

impl ListenerHandle {
    /// Remove the listener; returns whether it was still registered
    pub fn cancel(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}
