//! Shared fixtures for node-level tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use codec::{pass_by_copy, resolve_by_copy, Passable, Resolvable};
use messaging_actors::{ActorContext, Delivery, Message, Node};
use network::{GroupTransport, MemoryNetwork, MemoryTransport, NodeCommand, TransportAddress, TransportEvent};
use node_config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

pub const GROUP: &str = "ambit-test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config(name: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.node.group = GROUP.to_string();
    config.node.name = Some(name.to_string());
    config.transmission.send_timeout_ms = 200;
    config.transmission.max_send_attempts = 2;
    config
}

/// Text message passed by copy; its description is the text itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note(pub String);

impl Note {
    pub fn message(text: impl Into<String>) -> Message {
        Arc::new(Note(text.into()))
    }
}

impl Passable for Note {
    fn pass_for_transport(&self) -> codec::Result<Bytes> {
        pass_by_copy(self)
    }

    fn description(&self) -> String {
        self.0.clone()
    }
}

impl Resolvable for Note {
    fn resolve_after_transport(payload: &[u8]) -> codec::Result<Self> {
        resolve_by_copy(payload)
    }
}

/// Behavior that forwards every received note to a channel
pub fn recorder() -> (
    impl FnMut(&ActorContext, Delivery) + Send + 'static,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let behavior = move |_ctx: &ActorContext, delivery: Delivery| {
        if let Ok(Note(text)) = delivery.envelope.open::<Note>() {
            let _ = tx.send(text);
        }
    };
    (behavior, rx)
}

/// Behavior that ignores everything
pub fn idle() -> impl FnMut(&ActorContext, Delivery) + Send + 'static {
    |_ctx: &ActorContext, _delivery: Delivery| {}
}

pub fn descriptions(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.description()).collect()
}

/// Poll `condition` until it holds or a few seconds pass
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Collect exactly `count` items from `rx`
pub async fn take(rx: &mut mpsc::UnboundedReceiver<String>, count: usize) -> Vec<String> {
    let mut items = Vec::with_capacity(count);
    while items.len() < count {
        let item = within("recorded message", rx.recv()).await.expect("recorder closed");
        items.push(item);
    }
    items
}

pub async fn wait_for_handshake(a: &Node, b: &Node) {
    let (a_book, b_book) = (Arc::clone(a.address_book()), Arc::clone(b.address_book()));
    let (a_id, b_id) = (a.id(), b.id());
    eventually("mutual handshake", || {
        a_book.is_reachable(&b_id) && b_book.is_reachable(&a_id)
    })
    .await;
}

/// Two online nodes on one in-memory network, already introduced
pub async fn online_pair() -> (Arc<MemoryNetwork>, Node, Node) {
    let network = MemoryNetwork::new();
    let n1 = Node::new(test_config("n1"), Arc::new(network.transport(GROUP))).unwrap();
    let n2 = Node::new(test_config("n2"), Arc::new(network.transport(GROUP))).unwrap();
    n1.go_online().await.unwrap();
    n2.go_online().await.unwrap();
    wait_for_handshake(&n1, &n2).await;
    (network, n1, n2)
}

/// Transport wrapper that can hold a letter after it reached the wire,
/// simulating an acknowledgement that has not arrived yet
pub struct GatedTransport {
    inner: MemoryTransport,
    holding: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl GatedTransport {
    pub fn new(inner: MemoryTransport) -> Arc<Self> {
        Arc::new(Self {
            inner,
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// From now on, every letter send blocks after delivery until released
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Wait until a letter send is being held
    pub async fn held(&self) {
        within("held letter", self.entered.notified()).await;
    }

    /// Let held sends return and stop holding new ones
    pub fn release_all(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.release.add_permits(1024);
    }
}

#[async_trait]
impl GroupTransport for GatedTransport {
    async fn join(&self) -> network::Result<(TransportAddress, mpsc::UnboundedReceiver<TransportEvent>)> {
        self.inner.join().await
    }

    async fn leave(&self) -> network::Result<()> {
        self.inner.leave().await
    }

    async fn send(&self, to: &TransportAddress, payload: Bytes) -> network::Result<()> {
        let is_letter = matches!(
            NodeCommand::decode(&payload),
            Ok(NodeCommand::DeliverMessage { .. })
        );
        self.inner.send(to, payload).await?;
        if is_letter && self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        Ok(())
    }

    async fn broadcast(&self, payload: Bytes) -> network::Result<()> {
        self.inner.broadcast(payload).await
    }

    fn local_address(&self) -> Option<TransportAddress> {
        self.inner.local_address()
    }

    fn group(&self) -> &str {
        self.inner.group()
    }
}
