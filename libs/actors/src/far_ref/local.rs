//! Local far reference
//!
//! Target actor runs on this node. While connected, sending submits the
//! delivery straight to the target's scheduler; while disconnected letters
//! collect in an outbox that is flushed, in order, on reconnection. The
//! flush happens under the same lock as sending, so a letter sent during a
//! flush cannot overtake older ones.

use super::{ConnectionChange, FarReference, Letter, Message};
use crate::actor::Actor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use types::{FarRefId, TypeTag};

struct LocalState {
    outbox: VecDeque<Letter>,
    connected: bool,
    taken_offline: bool,
}

pub struct LocalFarReference {
    id: FarRefId,
    type_tags: Vec<TypeTag>,
    target: Arc<Actor>,
    state: Mutex<LocalState>,
}

impl LocalFarReference {
    pub fn new(id: FarRefId, type_tags: Vec<TypeTag>, target: Arc<Actor>) -> Self {
        Self {
            id,
            type_tags,
            target,
            state: Mutex::new(LocalState {
                outbox: VecDeque::new(),
                connected: true,
                taken_offline: false,
            }),
        }
    }

    fn deliver(&self, letter: Letter) {
        let sender = letter.sender();
        if let Err(e) = self
            .target
            .accept(self.id.object, Arc::clone(letter.envelope()), sender, self.id.node)
        {
            warn!(far_ref = %self.id, error = %e, "Local delivery failed");
        }
    }
}

#[async_trait]
impl FarReference for LocalFarReference {
    fn id(&self) -> FarRefId {
        self.id
    }

    fn type_tags(&self) -> &[TypeTag] {
        &self.type_tags
    }

    fn enqueue(&self, letter: Letter) {
        let mut state = self.state.lock();
        if state.connected {
            self.deliver(letter);
        } else {
            state.outbox.push_back(letter);
        }
    }

    fn serve(&self) {
        let mut state = self.state.lock();
        if !state.connected {
            return;
        }
        while let Some(letter) = state.outbox.pop_front() {
            self.deliver(letter);
        }
    }

    async fn retract_unsent_messages(&self) -> Vec<Message> {
        let drained: Vec<Letter> = self.state.lock().outbox.drain(..).collect();
        debug!(far_ref = %self.id, count = drained.len(), "Retracted local letters");
        drained.into_iter().map(Letter::into_message).collect()
    }

    fn notify_connection_change(&self, change: ConnectionChange) {
        let mut state = self.state.lock();
        match change {
            ConnectionChange::Disconnected => state.connected = false,
            ConnectionChange::TakenOffline => {
                state.connected = false;
                state.taken_offline = true;
            }
            ConnectionChange::Reconnected => {
                if state.taken_offline || state.connected {
                    return;
                }
                state.connected = true;
                debug!(far_ref = %self.id, queued = state.outbox.len(), "Flushing local outbox");
                while let Some(letter) = state.outbox.pop_front() {
                    self.deliver(letter);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn is_taken_offline(&self) -> bool {
        self.state.lock().taken_offline
    }

    fn pending(&self) -> usize {
        self.state.lock().outbox.len()
    }
}
