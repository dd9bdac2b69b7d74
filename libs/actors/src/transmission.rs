//! Far-Reference Transmission Pool
//!
//! Shared by every remote far reference of a node. Each serve signal becomes
//! a Tokio task that takes one letter from the reference (if the reference
//! is connected and idle), wraps its envelope in a `DeliverMessage` command
//! and hands it to the group transport. Because a reference hands out at most
//! one letter at a time, attempts for one reference are sequential while
//! different references transmit concurrently.
//!
//! A destination with no address-book entry fails immediately, as does a
//! send the transport reports as not retryable. Timeouts are retried in the
//! same task, each attempt bounded by the send timeout; once the attempts
//! are exhausted the letter goes back to its reference, which becomes
//! disconnected.
//!
//! A semaphore bounds how many sends are in flight at once.

use crate::far_ref::{FarReference, Message, RemoteFarReference};
use network::{AddressBook, GroupTransport, NodeCommand, TransportError};
use node_config::TransmissionSettings;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};
use types::NodeId;

/// Transmission counters
#[derive(Debug, Default)]
pub struct TransmissionMetrics {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub retries: AtomicU64,
}

/// Point-in-time copy of [`TransmissionMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmissionStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
}

impl TransmissionMetrics {
    pub fn snapshot(&self) -> TransmissionStats {
        TransmissionStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

pub struct TransmissionPool {
    local_node: NodeId,
    address_book: Arc<AddressBook>,
    transport: Arc<dyn GroupTransport>,
    permits: Arc<Semaphore>,
    settings: TransmissionSettings,
    runtime: Handle,
    metrics: TransmissionMetrics,
}

impl TransmissionPool {
    pub fn new(
        local_node: NodeId,
        address_book: Arc<AddressBook>,
        transport: Arc<dyn GroupTransport>,
        settings: TransmissionSettings,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_node,
            address_book,
            transport,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_transmissions)),
            settings,
            runtime,
            metrics: TransmissionMetrics::default(),
        })
    }

    /// Schedule an attempt for `reference`
    ///
    /// Harmless when the reference has nothing to send or is already
    /// transmitting; the spawned task simply finds no letter.
    pub fn serve(self: &Arc<Self>, reference: Arc<RemoteFarReference>) {
        let pool = Arc::clone(self);
        self.runtime.spawn(async move { pool.transmit(reference).await });
    }

    async fn transmit(&self, reference: Arc<RemoteFarReference>) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let Some(letter) = reference.impl_serve() else {
            return;
        };

        let target = reference.id();
        let Some(address) = self.address_book.lookup(&target.node) else {
            debug!(far_ref = %target, "No address for destination node");
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            reference.transmission_failed(letter);
            return;
        };

        let command = NodeCommand::DeliverMessage {
            sender: self.local_node,
            sender_actor: letter.sender(),
            target,
            envelope: letter.envelope().as_ref().clone(),
        };
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(far_ref = %target, error = %e, "Letter cannot be framed; kept queued");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                reference.transmission_failed(letter);
                return;
            }
        };

        let timeout = self.settings.send_timeout();
        for attempt in 1..=self.settings.max_send_attempts {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
            if attempt > 1 {
                self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            }

            let sent = tokio::time::timeout(timeout, self.transport.send(&address, payload.clone()))
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout("deliver_message", self.settings.send_timeout_ms)));
            match sent {
                Ok(()) => {
                    trace!(far_ref = %target, attempt, "Letter transmitted");
                    self.metrics.successes.fetch_add(1, Ordering::Relaxed);
                    reference.transmission_completed();
                    return;
                }
                Err(e) => {
                    debug!(far_ref = %target, attempt, error = %e, category = e.category(), "Send attempt failed");
                    if !e.is_retryable() {
                        break;
                    }
                }
            }

            if !self.address_book.is_reachable(&target.node) {
                break;
            }
        }

        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        reference.transmission_failed(letter);
    }

    /// Take back every letter `reference` has not handed to the network
    ///
    /// Waits for an attempt in flight to resolve first.
    pub async fn retract_unsent_messages(&self, reference: &RemoteFarReference) -> Vec<Message> {
        reference.retract_unsent_messages().await
    }

    /// Blocking form of [`retract_unsent_messages`](Self::retract_unsent_messages)
    /// for threads outside the runtime
    pub fn retract_unsent_messages_blocking(&self, reference: &RemoteFarReference) -> Vec<Message> {
        futures::executor::block_on(reference.retract_unsent_messages())
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    pub fn settings(&self) -> &TransmissionSettings {
        &self.settings
    }

    pub fn stats(&self) -> TransmissionStats {
        self.metrics.snapshot()
    }

    /// Sends currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.settings.max_concurrent_transmissions - self.permits.available_permits()
    }
}
