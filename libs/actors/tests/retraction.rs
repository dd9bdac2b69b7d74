mod common;

use common::*;
use messaging_actors::{FarReference, Node};
use network::MemoryNetwork;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn letter_in_flight_is_not_retracted_when_node_drops_out() {
    init_tracing();
    let network = MemoryNetwork::new();
    let gate = GatedTransport::new(network.transport(GROUP));
    let mut config = test_config("n1");
    config.transmission.send_timeout_ms = 10_000;
    let n1 = Node::new(config, gate.clone()).unwrap();
    let n2 = Node::new(test_config("n2"), Arc::new(network.transport(GROUP))).unwrap();
    n1.go_online().await.unwrap();
    n2.go_online().await.unwrap();
    wait_for_handshake(&n1, &n2).await;

    let (behavior, mut received) = recorder();
    let target = n2.spawn_actor(behavior).unwrap();
    let reference = n1.remote_reference(target.reference_id(), vec![]).unwrap();

    gate.hold();
    reference.send(Note::message("m1")).unwrap();
    gate.held().await;
    reference.send(Note::message("m2")).unwrap();
    reference.send(Note::message("m3")).unwrap();
    assert!(reference.is_transmitting());
    assert_eq!(reference.pending(), 2);

    network.partition(GROUP, &n1.local_address().unwrap(), &n2.local_address().unwrap());
    eventually("disconnection", || !reference.is_connected()).await;

    let retracting = {
        let reference = Arc::clone(&reference);
        tokio::spawn(async move { reference.retract_unsent_messages().await })
    };
    gate.release_all();

    let retracted = within("retraction", retracting).await.unwrap();
    assert_eq!(descriptions(&retracted), vec!["m2", "m3"]);
    assert!(!reference.is_connected());
    assert_eq!(reference.pending(), 0);
    assert_eq!(take(&mut received, 1).await, vec!["m1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_letter_is_kept_for_retraction() {
    init_tracing();
    let network = MemoryNetwork::new();
    let gate = GatedTransport::new(network.transport(GROUP));
    let mut config = test_config("n1");
    config.transmission.send_timeout_ms = 100;
    config.transmission.max_send_attempts = 2;
    let n1 = Node::new(config, gate.clone()).unwrap();
    let n2 = Node::new(test_config("n2"), Arc::new(network.transport(GROUP))).unwrap();
    n1.go_online().await.unwrap();
    n2.go_online().await.unwrap();
    wait_for_handshake(&n1, &n2).await;

    let target = n2.spawn_actor(idle()).unwrap();
    let reference = n1.remote_reference(target.reference_id(), vec![]).unwrap();

    gate.hold();
    reference.send(Note::message("slow")).unwrap();
    eventually("disconnection after timeouts", || !reference.is_connected()).await;
    gate.release_all();

    assert_eq!(reference.pending(), 1);
    let stats = n1.transmission_stats();
    assert_eq!((stats.attempts, stats.retries), (2, 1));
    assert_eq!((stats.successes, stats.failures), (0, 1));
    assert_eq!(descriptions(&reference.retract_unsent_messages().await), vec!["slow"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retract_while_idle_returns_everything_queued() {
    init_tracing();
    let (network, n1, n2) = online_pair().await;
    let target = n2.spawn_actor(idle()).unwrap();
    let reference = n1.remote_reference(target.reference_id(), vec![]).unwrap();

    network.partition(GROUP, &n1.local_address().unwrap(), &n2.local_address().unwrap());
    eventually("disconnection", || !reference.is_connected()).await;
    for text in ["q-1", "q-2"] {
        reference.send(Note::message(text)).unwrap();
    }

    let retracted = n1.pool().retract_unsent_messages(&reference).await;
    assert_eq!(descriptions(&retracted), vec!["q-1", "q-2"]);
    assert!(reference.retract_unsent_messages().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_letter_is_either_delivered_or_retracted() {
    init_tracing();
    let (_network, n1, n2) = online_pair().await;
    let (behavior, mut received) = recorder();
    let target = n2.spawn_actor(behavior).unwrap();
    let reference = n1.remote_reference(target.reference_id(), vec![]).unwrap();

    let sent: Vec<String> = (0..300).map(|i| format!("r-{}", i)).collect();
    for text in &sent[..150] {
        reference.send(Note::message(text.clone())).unwrap();
    }
    let retracting = {
        let reference = Arc::clone(&reference);
        tokio::spawn(async move { reference.retract_unsent_messages().await })
    };
    for text in &sent[150..] {
        reference.send(Note::message(text.clone())).unwrap();
    }
    let retracted = descriptions(&within("retraction", retracting).await.unwrap());

    // letters sent after the retraction keep flowing; wait for all of them
    let delivered = take(&mut received, sent.len() - retracted.len()).await;

    let delivered_set: HashSet<&String> = delivered.iter().collect();
    let retracted_set: HashSet<&String> = retracted.iter().collect();
    assert_eq!(delivered_set.len(), delivered.len(), "duplicate delivery");
    assert!(delivered_set.is_disjoint(&retracted_set));
    assert_eq!(delivered_set.len() + retracted_set.len(), sent.len());

    // delivered letters keep their relative order
    let positions: Vec<usize> = delivered
        .iter()
        .map(|text| sent.iter().position(|s| s == text).unwrap())
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn blocking_retract_from_foreign_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let (network, n1, n2, reference) = runtime.block_on(async {
        let (network, n1, n2) = online_pair().await;
        let target = n2.spawn_actor(idle()).unwrap();
        let reference = n1.remote_reference(target.reference_id(), vec![]).unwrap();
        network.partition(GROUP, &n1.local_address().unwrap(), &n2.local_address().unwrap());
        eventually("disconnection", || !reference.is_connected()).await;
        (network, n1, n2, reference)
    });

    reference.send(Note::message("stranded")).unwrap();
    let retracted = n1.pool().retract_unsent_messages_blocking(&reference);
    assert_eq!(descriptions(&retracted), vec!["stranded"]);

    drop((network, n1, n2, reference));
    runtime.shutdown_background();
}
