//! Ambit node runner - brings up a group of in-memory nodes
//!
//! One client node subscribes to `Printer`; every other node hosts an actor
//! that publishes itself as a `ColourPrinter`. When the client discovers a
//! printer it sends it a batch of pages through a far reference. The run
//! ends when every page arrived or the wait expires.
//!
//! Usage:
//!   ambit-node --nodes 3 --messages 20
//!   ambit-node --config config/node.toml --wait-secs 30

use anyhow::{bail, Context, Result};
use clap::Parser;
use messaging_actors::{ActorContext, Delivery, Node, TransmissionStats};
use network::{MemoryNetwork, ServiceOffer};
use node_config::{init_tracing, RuntimeConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use types::{FarRefId, TypeTag};

#[derive(Parser, Debug)]
#[command(name = "ambit-node")]
#[command(about = "Run a group of in-memory Ambit nodes")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes, the client included
    #[arg(short, long, default_value_t = 3)]
    nodes: usize,

    /// Pages sent to each discovered printer
    #[arg(short, long, default_value_t = 10)]
    messages: usize,

    /// Seconds to wait for every page to arrive
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

struct PrinterNode {
    node: Node,
    pages: Arc<AtomicUsize>,
}

fn printer() -> TypeTag {
    TypeTag::new("Printer")
}

fn colour_printer() -> TypeTag {
    TypeTag::new("ColourPrinter").extending(printer())
}

async fn start_node(config: &RuntimeConfig, network: &Arc<MemoryNetwork>, name: &str) -> Result<Node> {
    let mut config = config.clone();
    config.node.name = Some(name.to_string());
    let transport = Arc::new(network.transport(config.node.group.clone()));
    let node = Node::new(config, transport).with_context(|| format!("creating node {}", name))?;
    let address = node.go_online().await.with_context(|| format!("joining group as {}", name))?;
    info!(node = name, node_id = %node.id(), address = %address, "Node started");
    Ok(node)
}

async fn start_printer(config: &RuntimeConfig, network: &Arc<MemoryNetwork>, name: &str) -> Result<PrinterNode> {
    let node = start_node(config, network, name).await?;
    let pages = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pages);
    let label = name.to_string();

    let actor = node.spawn_actor(move |_ctx: &ActorContext, delivery: Delivery| {
        match delivery.envelope.open::<String>() {
            Ok(page) => {
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(printer = %label, page = %page, "Page printed");
            }
            Err(e) => warn!(printer = %label, error = %e, "Unreadable page"),
        }
    })?;
    node.publish(actor.id(), colour_printer(), &actor.reference_id())?;
    Ok(PrinterNode { node, pages })
}

/// Subscribe the client to printers; each discovered printer gets `pages` letters
fn start_client(node: &Node, pages: usize, discovered: Arc<AtomicUsize>) -> Result<()> {
    let client = node.spawn_actor(|_ctx: &ActorContext, _delivery: Delivery| {})?;
    let ctx = client.context().clone();

    let handler = move |offer: ServiceOffer| {
        let target = match offer.service.open::<FarRefId>() {
            Ok(target) => target,
            Err(e) => {
                warn!(publication = %offer.publication, error = %e, "Offer is not a far reference");
                return;
            }
        };
        discovered.fetch_add(1, Ordering::Relaxed);
        info!(publication = %offer.publication, printer = %target, "Printer discovered");

        let reference = match ctx.far_reference(target, vec![offer.topic.clone()]) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(printer = %target, error = %e, "Cannot reach printer");
                return;
            }
        };
        for page in 0..pages {
            let text = format!("page {} for {}", page, offer.publication);
            if let Err(e) = ctx.send(reference.as_ref(), Arc::new(text)) {
                warn!(printer = %target, error = %e, "Page not sent");
                break;
            }
        }
    };
    node.subscribe(client.id(), printer(), Arc::new(handler), true)?;
    Ok(())
}

fn print_summary(client: &Node, printers: &[PrinterNode], discovered: usize, elapsed: Duration) {
    let stats: TransmissionStats = client.transmission_stats();
    println!();
    println!("Ambit run summary");
    println!("  printers discovered : {}/{}", discovered, printers.len());
    for printer in printers {
        println!(
            "  {:<20}: {} pages",
            printer.node.id(),
            printer.pages.load(Ordering::Relaxed)
        );
    }
    println!(
        "  transmissions       : {} attempts, {} ok, {} failed, {} retried",
        stats.attempts, stats.successes, stats.failures, stats.retries
    );
    println!("  elapsed             : {:.2?}", elapsed);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RuntimeConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging)?;

    if args.nodes < 2 {
        bail!("at least two nodes are needed, got {}", args.nodes);
    }
    info!(nodes = args.nodes, messages = args.messages, group = %config.node.group, "Starting Ambit group");

    let started = Instant::now();
    let network = MemoryNetwork::new();
    let mut printers = Vec::with_capacity(args.nodes - 1);
    for index in 1..args.nodes {
        printers.push(start_printer(&config, &network, &format!("printer-{}", index)).await?);
    }

    let client = start_node(&config, &network, "client").await?;
    let discovered = Arc::new(AtomicUsize::new(0));
    start_client(&client, args.messages, Arc::clone(&discovered))?;

    let expected = printers.len() * args.messages;
    let deadline = started + Duration::from_secs(args.wait_secs);
    let delivered = loop {
        let delivered: usize = printers.iter().map(|p| p.pages.load(Ordering::Relaxed)).sum();
        if delivered >= expected || Instant::now() >= deadline {
            break delivered;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    print_summary(&client, &printers, discovered.load(Ordering::Relaxed), started.elapsed());

    client.shutdown().await?;
    for printer in &printers {
        printer.node.shutdown().await?;
    }

    if delivered < expected {
        bail!("only {} of {} pages arrived", delivered, expected);
    }
    info!(pages = delivered, "All pages delivered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["ambit-node"]).unwrap();
        assert_eq!(args.nodes, 3);
        assert_eq!(args.messages, 10);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args =
            Args::try_parse_from(["ambit-node", "--nodes", "5", "-m", "2", "--config", "node.toml"]).unwrap();
        assert_eq!(args.nodes, 5);
        assert_eq!(args.messages, 2);
        assert_eq!(args.config, Some(PathBuf::from("node.toml")));
    }

    #[test]
    fn test_colour_printer_satisfies_printer() {
        assert!(colour_printer().is_subtype_of(&printer()));
        assert!(!printer().is_subtype_of(&colour_printer()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_printer_gets_its_pages() {
        let mut config = RuntimeConfig::default();
        config.node.group = "ambit-cli-test".to_string();
        let network = MemoryNetwork::new();

        let printers = vec![
            start_printer(&config, &network, "printer-1").await.unwrap(),
            start_printer(&config, &network, "printer-2").await.unwrap(),
        ];
        let client = start_node(&config, &network, "client").await.unwrap();
        let discovered = Arc::new(AtomicUsize::new(0));
        start_client(&client, 4, Arc::clone(&discovered)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while printers.iter().any(|p| p.pages.load(Ordering::Relaxed) < 4) {
            assert!(Instant::now() < deadline, "pages did not arrive");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(discovered.load(Ordering::Relaxed), 2);
        for printer in &printers {
            assert_eq!(printer.pages.load(Ordering::Relaxed), 4);
        }
    }
}
