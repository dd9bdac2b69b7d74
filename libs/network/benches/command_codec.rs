//! Node command encode/decode throughput
//!
//! Every letter crosses the wire as a `DeliverMessage`; this measures the
//! framing cost for small and large envelopes.

use bytes::Bytes;
use codec::Envelope;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use network::{NodeCommand, ServiceOffer};
use types::{ActorId, FarRefId, NodeId, ObjectId, PublicationId, TypeTag};

fn letter(payload_size: usize) -> NodeCommand {
    let target = FarRefId::new(NodeId::new(), ActorId::new(), ObjectId::new(1));
    NodeCommand::DeliverMessage {
        sender: NodeId::new(),
        sender_actor: Some(ActorId::new()),
        target,
        envelope: Envelope::from_parts(Bytes::from(vec![0xab; payload_size]), "bench", Some(target.actor)),
    }
}

fn bench_deliver_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver_message");

    for size in [64usize, 1024, 16 * 1024] {
        let command = letter(size);
        let encoded = command.encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &command, |b, command| {
            b.iter(|| black_box(command.encode().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| black_box(NodeCommand::decode(black_box(encoded)).unwrap()));
        });
    }

    group.finish();
}

fn bench_join_services(c: &mut Criterion) {
    let node = NodeId::new();
    let topic = TypeTag::new("ColourPrinter").extending(TypeTag::new("Printer"));
    let offers: Vec<ServiceOffer> = (0..32)
        .map(|sequence| ServiceOffer {
            publication: PublicationId::new(node, sequence),
            owner: ActorId::new(),
            topic: topic.clone(),
            service: Envelope::from_parts(Bytes::from_static(b"service"), "service", None),
        })
        .collect();
    let command = NodeCommand::JoinServices { offers };

    c.bench_function("join_services_32_offers", |b| {
        b.iter(|| {
            let encoded = command.encode().unwrap();
            black_box(NodeCommand::decode(&encoded).unwrap())
        });
    });
}

criterion_group!(benches, bench_deliver_message, bench_join_services);
criterion_main!(benches);
