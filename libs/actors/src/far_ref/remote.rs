//! Remote far reference
//!
//! Target lives on another node. Letters wait in an outbox; the node's
//! transmission pool takes them one at a time through [`impl_serve`] and
//! reports back with [`transmission_completed`] or [`transmission_failed`].
//!
//! All state sits behind one lock: the outbox, the connection flags and the
//! transmission slot (`Idle`, `InFlight`, or `RetractPending` with the
//! retractors waiting for the in-flight attempt). Resolving an attempt and
//! handing the outbox to waiting retractors happen in the same critical
//! section, so no letter can be both retracted and attempted.
//!
//! Listener callbacks are fired after the lock is released.
//!
//! [`impl_serve`]: RemoteFarReference::impl_serve
//! [`transmission_completed`]: RemoteFarReference::transmission_completed
//! [`transmission_failed`]: RemoteFarReference::transmission_failed

use super::listeners::{Listener, ListenerHandle, ListenerRegistry};
use super::{ConnectionChange, FarReference, Letter, Message};
use crate::scheduler::Scheduler;
use crate::transmission::TransmissionPool;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, trace};
use types::{FarRefId, TypeTag};

enum Transmission {
    Idle,
    InFlight,
    /// In flight, with retractors waiting for the outcome
    RetractPending(Vec<oneshot::Sender<Vec<Letter>>>),
}

struct RemoteState {
    outbox: VecDeque<Letter>,
    connected: bool,
    taken_offline: bool,
    transmission: Transmission,
}

impl RemoteState {
    /// Return to idle; waiting retractors get the outbox
    fn settle(&mut self) {
        if let Transmission::RetractPending(waiters) = mem::replace(&mut self.transmission, Transmission::Idle) {
            let mut drained: Vec<Letter> = self.outbox.drain(..).collect();
            for waiter in waiters {
                let _ = waiter.send(mem::take(&mut drained));
            }
        }
    }
}

pub struct RemoteFarReference {
    id: FarRefId,
    type_tags: Vec<TypeTag>,
    pool: Arc<TransmissionPool>,
    this: Weak<RemoteFarReference>,
    state: Mutex<RemoteState>,
    disconnection: Arc<ListenerRegistry>,
    reconnection: Arc<ListenerRegistry>,
    taken_offline: Arc<ListenerRegistry>,
}

impl RemoteFarReference {
    pub fn new(id: FarRefId, type_tags: Vec<TypeTag>, pool: Arc<TransmissionPool>, connected: bool) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            type_tags,
            pool,
            this: this.clone(),
            state: Mutex::new(RemoteState {
                outbox: VecDeque::new(),
                connected,
                taken_offline: false,
                transmission: Transmission::Idle,
            }),
            disconnection: ListenerRegistry::new("disconnection"),
            reconnection: ListenerRegistry::new("reconnection"),
            taken_offline: ListenerRegistry::new("taken_offline"),
        })
    }

    /// Take the next letter for transmission
    ///
    /// Returns `None` unless the reference is connected, idle and has
    /// letters queued. A returned letter must be resolved with exactly one of
    /// [`transmission_completed`](Self::transmission_completed) or
    /// [`transmission_failed`](Self::transmission_failed).
    pub fn impl_serve(&self) -> Option<Letter> {
        let mut state = self.state.lock();
        if !state.connected || state.taken_offline || !matches!(state.transmission, Transmission::Idle) {
            return None;
        }
        let letter = state.outbox.pop_front()?;
        state.transmission = Transmission::InFlight;
        trace!(far_ref = %self.id, remaining = state.outbox.len(), "Letter taken for transmission");
        Some(letter)
    }

    /// The letter handed out by `impl_serve` reached the transport
    pub fn transmission_completed(&self) {
        self.state.lock().settle();
        self.serve();
    }

    /// The letter handed out by `impl_serve` could not be delivered
    ///
    /// The letter goes back to the front of the outbox and the reference
    /// becomes disconnected until the next reconnection.
    pub fn transmission_failed(&self, letter: Letter) {
        let was_connected = {
            let mut state = self.state.lock();
            state.outbox.push_front(letter);
            state.settle();
            mem::replace(&mut state.connected, false)
        };
        debug!(far_ref = %self.id, "Transmission failed; reference disconnected");
        if was_connected {
            self.disconnection.fire(self.id);
        }
    }

    /// Run `callback` on `owner` each time the reference goes from connected
    /// to disconnected, including when its target is taken offline
    ///
    /// The callback receives the id of this reference.
    pub fn add_disconnection_listener(&self, owner: Scheduler, callback: Listener) -> ListenerHandle {
        self.disconnection.add(owner, callback)
    }

    /// Run `callback` on `owner` each time the reference becomes connected again
    ///
    /// The callback receives the id of this reference.
    pub fn add_reconnection_listener(&self, owner: Scheduler, callback: Listener) -> ListenerHandle {
        self.reconnection.add(owner, callback)
    }

    /// Run `callback` on `owner` once, when the target is withdrawn
    ///
    /// The callback receives the id of this reference. A disconnection
    /// notification precedes it when the reference was connected.
    pub fn add_taken_offline_listener(&self, owner: Scheduler, callback: Listener) -> ListenerHandle {
        self.taken_offline.add(owner, callback)
    }

    /// Whether an attempt is currently outstanding
    pub fn is_transmitting(&self) -> bool {
        !matches!(self.state.lock().transmission, Transmission::Idle)
    }
}

#[async_trait]
impl FarReference for RemoteFarReference {
    fn id(&self) -> FarRefId {
        self.id
    }

    fn type_tags(&self) -> &[TypeTag] {
        &self.type_tags
    }

    fn enqueue(&self, letter: Letter) {
        self.state.lock().outbox.push_back(letter);
        self.serve();
    }

    fn serve(&self) {
        {
            let state = self.state.lock();
            let ready = state.connected
                && !state.taken_offline
                && matches!(state.transmission, Transmission::Idle)
                && !state.outbox.is_empty();
            if !ready {
                return;
            }
        }
        if let Some(this) = self.this.upgrade() {
            self.pool.serve(this);
        }
    }

    async fn retract_unsent_messages(&self) -> Vec<Message> {
        let pending = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match &mut state.transmission {
                Transmission::Idle => Err(state.outbox.drain(..).collect::<Vec<_>>()),
                Transmission::InFlight => {
                    let (tx, rx) = oneshot::channel();
                    state.transmission = Transmission::RetractPending(vec![tx]);
                    Ok(rx)
                }
                Transmission::RetractPending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Ok(rx)
                }
            }
        };

        let letters = match pending {
            Ok(rx) => rx.await.unwrap_or_default(),
            Err(drained) => drained,
        };
        debug!(far_ref = %self.id, count = letters.len(), "Retracted unsent letters");
        letters.into_iter().map(Letter::into_message).collect()
    }

    fn notify_connection_change(&self, change: ConnectionChange) {
        match change {
            ConnectionChange::Disconnected => {
                let was_connected = mem::replace(&mut self.state.lock().connected, false);
                if was_connected {
                    debug!(far_ref = %self.id, "Reference disconnected");
                    self.disconnection.fire(self.id);
                }
            }
            ConnectionChange::Reconnected => {
                let reconnected = {
                    let mut state = self.state.lock();
                    if state.taken_offline || state.connected {
                        false
                    } else {
                        state.connected = true;
                        true
                    }
                };
                if reconnected {
                    debug!(far_ref = %self.id, "Reference reconnected");
                    self.reconnection.fire(self.id);
                    self.serve();
                }
            }
            ConnectionChange::TakenOffline => {
                let transition = {
                    let mut state = self.state.lock();
                    if state.taken_offline {
                        None
                    } else {
                        state.taken_offline = true;
                        Some(mem::replace(&mut state.connected, false))
                    }
                };
                if let Some(was_connected) = transition {
                    debug!(far_ref = %self.id, "Target taken offline");
                    if was_connected {
                        self.disconnection.fire(self.id);
                    }
                    self.taken_offline.fire(self.id);
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
