//! Discovery service
//!
//! Runs the [`DiscoveryEngine`] on its own scheduler: every operation is a
//! task on that loop, so the engine is only ever touched by one thread at a
//! time and callers never wait. Publication and subscription ids are handed
//! out up front, which lets `publish`/`subscribe` return their handles
//! immediately.
//!
//! New publications and stored subscriptions are announced to the group
//! through the node's outbound channel.

use super::engine::{DiscoveryEngine, Notification, ServiceHandler, Subscription, SubscriptionId};
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use codec::Envelope;
use network::{NodeCommand, Outgoing, ServiceOffer};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use types::{ActorId, NodeId, PublicationId, TypeTag};

struct Shared {
    node: NodeId,
    scheduler: Scheduler,
    engine: Mutex<DiscoveryEngine>,
    next_publication: AtomicU64,
    next_subscription: AtomicU64,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl Shared {
    fn announce(&self, command: NodeCommand) {
        let kind = command.kind();
        if self.outbound.send(Outgoing::Broadcast(command)).is_err() {
            debug!(node_id = %self.node, command = kind, "Outbound channel closed; announcement dropped");
        }
    }
}

fn deliver_all(notifications: Vec<Notification>) {
    for notification in notifications {
        notification.deliver();
    }
}

#[derive(Clone)]
pub struct DiscoveryService {
    shared: Arc<Shared>,
}

impl DiscoveryService {
    pub fn new(node: NodeId, scheduler: Scheduler, outbound: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            shared: Arc::new(Shared {
                node,
                scheduler,
                engine: Mutex::new(DiscoveryEngine::new()),
                next_publication: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                outbound,
            }),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    /// Publish `service` under `topic` on behalf of `owner`
    pub fn publish(&self, owner: ActorId, topic: TypeTag, service: Envelope) -> Result<PublicationHandle, SchedulerError> {
        let sequence = self.shared.next_publication.fetch_add(1, Ordering::Relaxed);
        let id = PublicationId::new(self.shared.node, sequence);
        let offer = ServiceOffer {
            publication: id,
            owner,
            topic,
            service,
        };

        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            let notifications = shared.engine.lock().add_publication(offer.clone());
            deliver_all(notifications);
            shared.announce(NodeCommand::ProvideService(offer));
        })?;

        Ok(PublicationHandle {
            id,
            service: self.clone(),
        })
    }

    /// Subscribe `owner` to services whose topic is a subtype of `topic`
    ///
    /// `handler` runs on `owner_scheduler`. A non-permanent subscription
    /// fires at most once.
    pub fn subscribe(
        &self,
        owner: ActorId,
        owner_scheduler: Scheduler,
        topic: TypeTag,
        handler: Arc<dyn ServiceHandler>,
        permanent: bool,
    ) -> Result<SubscriptionHandle, SchedulerError> {
        let id = SubscriptionId::new(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription::new(id, owner, owner_scheduler, topic.clone(), handler, permanent);

        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            let outcome = shared.engine.lock().add_subscription(subscription);
            deliver_all(outcome.notifications);
            if outcome.stored {
                shared.announce(NodeCommand::RequireService { topic });
            }
        })?;

        Ok(SubscriptionHandle {
            id,
            service: self.clone(),
        })
    }

    /// A publication arrived from another node
    pub fn notify_external_publication(&self, offer: ServiceOffer) -> Result<(), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            trace!(publication = %offer.publication, topic = %offer.topic, "External publication");
            let notifications = shared.engine.lock().notify_external_publication(&offer);
            deliver_all(notifications);
        })
    }

    /// Collect local publications matching any of `topics` and pass them to
    /// `reply` from the discovery loop
    pub fn answer_requirements<F>(&self, topics: Vec<TypeTag>, reply: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(Vec<ServiceOffer>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            let offers = collect_matching(&shared.engine.lock(), &topics);
            reply(offers);
        })
    }

    /// Pass all open subscription topics to `reply` from the discovery loop
    pub fn with_open_topics<F>(&self, reply: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(Vec<TypeTag>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            let topics = shared.engine.lock().all_open_subscription_topics();
            reply(topics);
        })
    }

    pub async fn local_publications_matching(&self, topic: TypeTag) -> Result<Vec<ServiceOffer>, SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .scheduler
            .call(move || shared.engine.lock().local_publications_matching(&topic))
            .await
    }

    pub async fn all_open_subscription_topics(&self) -> Result<Vec<TypeTag>, SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .scheduler
            .call(move || shared.engine.lock().all_open_subscription_topics())
            .await
    }

    /// Publication and subscription counts, read on the discovery loop
    pub async fn counts(&self) -> Result<(usize, usize), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .scheduler
            .call(move || {
                let engine = shared.engine.lock();
                (engine.publication_count(), engine.subscription_count())
            })
            .await
    }

    fn delete_publication(&self, id: PublicationId) -> Result<(), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            if shared.engine.lock().delete_publication(&id) {
                debug!(publication = %id, "Publication cancelled");
            }
        })
    }

    fn delete_subscription(&self, id: SubscriptionId) -> Result<(), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.submit(move || {
            if shared.engine.lock().delete_subscription(&id) {
                debug!(subscription = %id, "Subscription cancelled");
            }
        })
    }

    pub fn stop(&self) {
        self.shared.scheduler.stop();
    }
}

fn collect_matching(engine: &DiscoveryEngine, topics: &[TypeTag]) -> Vec<ServiceOffer> {
    let mut offers = BTreeMap::new();
    for topic in topics {
        for offer in engine.local_publications_matching(topic) {
            offers.entry(offer.publication).or_insert(offer);
        }
    }
    offers.into_values().collect()
}

/// Cancellation handle for a publication
#[derive(Clone)]
pub struct PublicationHandle {
    id: PublicationId,
    service: DiscoveryService,
}

impl PublicationHandle {
    pub fn id(&self) -> PublicationId {
        self.id
    }

    /// Withdraw the publication locally; no one is notified
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        self.service.delete_publication(self.id)
    }
}

/// Cancellation handle for a subscription
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    service: DiscoveryService,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Close the subscription; no one is notified
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        self.service.delete_subscription(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn service() -> Envelope {
        Envelope::from_parts(Bytes::from_static(b"svc"), "service", None)
    }

    #[tokio::test]
    async fn test_publish_notifies_local_subscriber_and_announces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryService::new(NodeId::new(), Scheduler::new("discovery").unwrap(), tx);
        let subscriber = Scheduler::new("subscriber").unwrap();
        let (found_tx, mut found_rx) = mpsc::unbounded_channel();

        discovery
            .subscribe(
                ActorId::new(),
                subscriber.clone(),
                TypeTag::new("Device"),
                Arc::new(move |offer: ServiceOffer| {
                    let _ = found_tx.send(offer.topic);
                }),
                true,
            )
            .unwrap();
        let sensor = TypeTag::new("Sensor").extending(TypeTag::new("Device"));
        discovery.publish(ActorId::new(), sensor.clone(), service()).unwrap();

        assert_eq!(found_rx.recv().await, Some(sensor.clone()));
        assert!(matches!(
            rx.recv().await,
            Some(Outgoing::Broadcast(NodeCommand::RequireService { .. }))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(Outgoing::Broadcast(NodeCommand::ProvideService(offer))) if offer.topic == sensor
        ));
    }

    #[tokio::test]
    async fn test_cancelled_publication_no_longer_matches() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryService::new(NodeId::new(), Scheduler::new("discovery").unwrap(), tx);
        let handle = discovery
            .publish(ActorId::new(), TypeTag::new("Printer"), service())
            .unwrap();

        assert_eq!(
            discovery.local_publications_matching(TypeTag::new("Printer")).await.unwrap().len(),
            1
        );
        handle.cancel().unwrap();
        assert!(discovery
            .local_publications_matching(TypeTag::new("Printer"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_answer_requirements_deduplicates_offers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryService::new(NodeId::new(), Scheduler::new("discovery").unwrap(), tx);
        let device = TypeTag::new("Device");
        let sensor = TypeTag::new("Sensor").extending(device.clone());
        discovery.publish(ActorId::new(), sensor.clone(), service()).unwrap();

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        discovery
            .answer_requirements(vec![device, sensor], move |offers| {
                let _ = reply_tx.send(offers.len());
            })
            .unwrap();
        assert_eq!(reply_rx.await.unwrap(), 1);
    }
}
