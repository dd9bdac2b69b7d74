//! Exported-Object Registry
//!
//! Per-actor table of objects reachable from other actors. Exporting assigns
//! an [`ObjectId`] from a per-registry counter. Ids are never reused: an
//! object exported again while still online keeps its id, while an object
//! exported after being taken offline gets a fresh one. Alongside each
//! object the registry tracks the clients (node plus optional actor) that
//! have sent to it; when the object is taken offline, those clients are the
//! ones to tell.
//!
//! Entries only ever disappear through [`ExportRegistry::take_offline`].

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use types::{ActorId, NodeId, ObjectId};

/// An object exported by an actor
pub type ExportedObject = Arc<dyn Any + Send + Sync>;

/// A party known to hold a far reference to an exported object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Client {
    pub node: NodeId,
    pub actor: Option<ActorId>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    objects: HashMap<ObjectId, ExportedObject>,
    // allocation address of each online object; only valid while the object
    // is held in `objects`
    ids_by_address: HashMap<usize, ObjectId>,
    clients: HashMap<ObjectId, HashSet<Client>>,
}

/// Exported objects of one actor
pub struct ExportRegistry {
    actor: ActorId,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for ExportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRegistry")
            .field("actor", &self.actor)
            .field("exported", &self.len())
            .finish()
    }
}

fn address_of(object: &ExportedObject) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl ExportRegistry {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Export `object`, returning its id; repeated exports are no-ops
    pub fn export(&self, object: &ExportedObject) -> ObjectId {
        let address = address_of(object);
        let mut state = self.state.lock();
        if let Some(&id) = state.ids_by_address.get(&address) {
            return id;
        }

        state.next_id += 1;
        let id = ObjectId::new(state.next_id);
        state.objects.insert(id, Arc::clone(object));
        state.ids_by_address.insert(address, id);
        state.clients.entry(id).or_default();
        debug!(actor_id = %self.actor, object_id = %id, "Object exported");
        id
    }

    /// Look up an exported object
    pub fn resolve(&self, id: ObjectId) -> Option<ExportedObject> {
        self.state.lock().objects.get(&id).cloned()
    }

    pub fn is_exported(&self, id: ObjectId) -> bool {
        self.state.lock().objects.contains_key(&id)
    }

    /// Remember that `client` talks to `id`
    ///
    /// A client entry is created even when the id is not exported, so the
    /// first letter for an unknown id leaves a trace of who sent it.
    pub fn record_client(&self, id: ObjectId, client: Client) {
        self.state.lock().clients.entry(id).or_default().insert(client);
    }

    pub fn clients_of(&self, id: ObjectId) -> Vec<Client> {
        self.state
            .lock()
            .clients
            .get(&id)
            .map(|clients| clients.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove `id`, returning the clients that knew about it
    ///
    /// Returns `None` when the object was not exported.
    pub fn take_offline(&self, id: ObjectId) -> Option<Vec<Client>> {
        let mut state = self.state.lock();
        let object = state.objects.remove(&id)?;
        state.ids_by_address.remove(&address_of(&object));
        let clients = state
            .clients
            .remove(&id)
            .map(|clients| clients.into_iter().collect())
            .unwrap_or_default();
        debug!(actor_id = %self.actor, object_id = %id, "Object taken offline");
        Some(clients)
    }

    pub fn exported_ids(&self) -> Vec<ObjectId> {
        self.state.lock().objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
