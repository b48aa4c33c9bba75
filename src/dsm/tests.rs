//! Multi-node scenarios over the in-process channel network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use super::config::RunnerConfig;
use super::dispatch::UpdateHandler;
use super::error::DsmError;
use super::membership::ProcessId;
use super::message::{DsmMessage, Envelope, MessageTag};
use super::node::{DsmNode, PollOutcome};
use super::runner::spawn_node;
use super::store::{VarState, UNINITIALIZED};
use super::transport::{ChannelEndpoint, ChannelNetwork, Transport};

type Seen = Arc<Mutex<Vec<(String, i32, ProcessId)>>>;

/// Handler that records every notification.
fn recorder() -> (Seen, impl UpdateHandler + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = move |name: &str, value: i32, rank: ProcessId| {
        sink.lock().unwrap().push((name.to_string(), value, rank));
    };
    (seen, handler)
}

/// Build `size` nodes, each with a recording handler.
fn cluster(size: u32) -> (ChannelNetwork, Vec<DsmNode<ChannelEndpoint>>, Vec<Seen>) {
    let mut network = ChannelNetwork::new(size);
    let mut nodes = Vec::new();
    let mut seen = Vec::new();

    for ep in network.endpoints() {
        let (log, handler) = recorder();
        nodes.push(DsmNode::with_handler(ep, handler).unwrap());
        seen.push(log);
    }
    (network, nodes, seen)
}

fn drain_all(nodes: &mut [DsmNode<ChannelEndpoint>]) {
    // Keep sweeping until a full pass handles nothing.
    loop {
        let mut handled = 0;
        for node in nodes.iter_mut() {
            handled += node.drain().unwrap();
        }
        if handled == 0 {
            break;
        }
    }
}

/// Test: propagation reaches a subscriber.
///
/// B subscribes with broadcast, A absorbs the announcement, A writes 7,
/// B drains one message and observes the value plus one notification.
#[test]
fn test_write_propagates_to_subscriber() {
    let (_network, mut nodes, seen) = cluster(2);

    nodes[1].subscribe("n").unwrap();
    assert_eq!(
        nodes[0].poll_once().unwrap(),
        PollOutcome::Subscribed {
            name: "n".to_string(),
            from: 1
        }
    );

    nodes[0].write("n", 7).unwrap();
    assert_eq!(
        nodes[1].poll_once().unwrap(),
        PollOutcome::Updated {
            name: "n".to_string(),
            value: 7,
            from: 0
        }
    );

    assert_eq!(nodes[1].get("n"), 7);
    assert_eq!(*seen[1].lock().unwrap(), vec![("n".to_string(), 7, 1)]);
    assert!(seen[0].lock().unwrap().is_empty());
}

/// Test: absorbing a Subscribe never emits another Subscribe.
#[test]
fn test_no_rebroadcast_on_subscribe_receipt() {
    let (_network, mut nodes, _seen) = cluster(3);

    nodes[0].subscribe("n").unwrap();
    assert_eq!(nodes[0].transport().sent_count(MessageTag::Subscribe), 2);

    assert!(matches!(
        nodes[1].poll_once().unwrap(),
        PollOutcome::Subscribed { .. }
    ));

    assert_eq!(nodes[1].transport().sent_count(MessageTag::Subscribe), 0);
    assert!(nodes[0].try_poll().unwrap().is_none());

    // Node 2 sees only the first announcement.
    assert!(matches!(
        nodes[2].poll_once().unwrap(),
        PollOutcome::Subscribed { from: 0, .. }
    ));
    assert!(nodes[2].try_poll().unwrap().is_none());

    // The receiver registered the full group and holds an uninitialized replica.
    assert_eq!(nodes[1].subscribers_of("n").iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(nodes[1].state("n"), VarState::Uninitialized);
}

/// Test: three processes, process 0 subscribes to "v" and writes 42.
///
/// Per-source order puts the announcement ahead of the update, so each
/// receiver processes the Subscribe and then the ValueWrite.
#[test]
fn test_end_to_end_three_processes() {
    let (_network, mut nodes, seen) = cluster(3);

    nodes[0].subscribe("v").unwrap();
    nodes[0].write("v", 42).unwrap();

    for rank in 1..3usize {
        assert!(matches!(
            nodes[rank].poll_once().unwrap(),
            PollOutcome::Subscribed { from: 0, .. }
        ));
        assert!(matches!(
            nodes[rank].poll_once().unwrap(),
            PollOutcome::Updated { value: 42, from: 0, .. }
        ));

        assert_eq!(nodes[rank].get("v"), 42);
        assert_eq!(
            *seen[rank].lock().unwrap(),
            vec![("v".to_string(), 42, rank as ProcessId)]
        );
    }

    assert_eq!(nodes[0].get("v"), 42);
    assert_eq!(nodes[0].stats().updates_sent, 2);
}

/// Test: optimistic CAS race.
///
/// Both processes observe the same value and both swaps succeed. After the
/// updates cross, each replica holds the OTHER process's value: the replicas
/// diverge and one of the two updates is lost at each site.
#[test]
fn test_concurrent_cas_both_succeed() {
    let (_network, mut nodes, _seen) = cluster(2);

    nodes[0].subscribe("n").unwrap();
    drain_all(&mut nodes);
    nodes[0].write("n", 1).unwrap();
    drain_all(&mut nodes);
    assert_eq!(nodes[1].get("n"), 1);

    assert!(nodes[0].compare_and_exchange("n", 1, 10).unwrap());
    assert!(nodes[1].compare_and_exchange("n", 1, 20).unwrap());

    drain_all(&mut nodes);
    assert_eq!(nodes[0].get("n"), 20);
    assert_eq!(nodes[1].get("n"), 10);
}

/// Test: a failed CAS sends nothing.
#[test]
fn test_failed_cas_has_no_side_effects() {
    let (_network, mut nodes, _seen) = cluster(2);

    nodes[0].subscribe_with("n", false).unwrap();
    nodes[0].write("n", 5).unwrap();
    let sent = nodes[0].transport().sent_count(MessageTag::ValueWrite);

    assert!(!nodes[0].compare_and_exchange("n", 6, 7).unwrap());
    assert_eq!(nodes[0].get("n"), 5);
    assert_eq!(nodes[0].transport().sent_count(MessageTag::ValueWrite), sent);
}

/// Test: an update arriving before a handler is set fails fast.
#[test]
fn test_update_without_handler_is_error() {
    let mut network = ChannelNetwork::new(2);
    let ep0 = network.create_endpoint(0).unwrap();
    let ep1 = network.create_endpoint(1).unwrap();

    let mut writer = DsmNode::new(ep0).unwrap();
    let mut reader = DsmNode::new(ep1).unwrap();
    assert!(!reader.has_callback());

    writer.subscribe_with("v", false).unwrap();
    writer.write("v", 3).unwrap();

    let err = reader.poll_once().unwrap_err();
    assert!(matches!(err, DsmError::HandlerNotSet { ref name } if name == "v"));
    assert!(err.is_fatal());
    assert_eq!(reader.get("v"), UNINITIALIZED);

    // Once configured, later updates apply normally.
    let (seen, handler) = recorder();
    reader.set_callback(handler);
    writer.write("v", 4).unwrap();
    reader.poll_once().unwrap();
    assert_eq!(reader.get("v"), 4);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

/// Test: unknown kinds are drained and never fatal.
#[test]
fn test_unrecognized_kind_is_discarded() {
    let mut network = ChannelNetwork::new(2);
    let raw = network.create_endpoint(0).unwrap();
    let (_seen, handler) = recorder();
    let mut node = DsmNode::with_handler(network.create_endpoint(1).unwrap(), handler).unwrap();

    raw.send(
        1,
        Envelope {
            tag: MessageTag::Other(999),
            payload: vec![1, 2, 3, 4],
        },
    )
    .unwrap();
    raw.send(1, DsmMessage::ValueWrite { name: "v".to_string(), value: 8 }.encode().unwrap())
        .unwrap();

    assert_eq!(
        node.poll_once().unwrap(),
        PollOutcome::Unrecognized { tag: 999, from: 0 }
    );
    assert!(matches!(
        node.poll_once().unwrap(),
        PollOutcome::Updated { value: 8, .. }
    ));
    assert_eq!(node.stats().unrecognized, 1);
}

/// Test: a malformed value write is a fatal protocol violation.
#[test]
fn test_malformed_update_is_protocol_violation() {
    let mut network = ChannelNetwork::new(2);
    let raw = network.create_endpoint(0).unwrap();
    let (_seen, handler) = recorder();
    let mut node = DsmNode::with_handler(network.create_endpoint(1).unwrap(), handler).unwrap();

    // Name only, value missing.
    raw.send(
        1,
        Envelope {
            tag: MessageTag::ValueWrite,
            payload: b"v".to_vec(),
        },
    )
    .unwrap();

    let err = node.poll_once().unwrap_err();
    assert!(matches!(err, DsmError::ProtocolViolation { from: 0, .. }));
    assert!(err.is_fatal());
    assert!(!node.variables().contains(&"v".to_string()));
}

/// Test: send failures surface to the caller; the local write stands.
#[test]
fn test_send_failure_is_reported() {
    let (network, mut nodes, _seen) = cluster(3);
    network.disconnect(2);

    match nodes[0].subscribe("n") {
        Err(DsmError::Propagation { name, failed }) => {
            assert_eq!(name, "n");
            assert_eq!(failed, vec![2]);
        }
        other => panic!("expected propagation error, got {:?}", other),
    }
    assert_eq!(nodes[0].subscribers_of("n").len(), 3);

    assert!(matches!(
        nodes[0].write("n", 11),
        Err(DsmError::Propagation { .. })
    ));
    assert_eq!(nodes[0].get("n"), 11);

    // The reachable peer still got both messages.
    assert_eq!(nodes[1].drain().unwrap(), 2);
    assert_eq!(nodes[1].get("n"), 11);
    assert!(nodes[2].try_poll().unwrap().is_none());
}

/// Test: write on a variable nobody subscribed to stays local.
#[test]
fn test_unsubscribed_write_stays_local() {
    let (_network, mut nodes, _seen) = cluster(3);

    nodes[0].write("private", 5).unwrap();
    assert_eq!(nodes[0].get("private"), 5);
    assert_eq!(nodes[0].transport().sent_count(MessageTag::ValueWrite), 0);
    assert!(nodes[1].try_poll().unwrap().is_none());
}

/// Test: single-writer-per-variable workloads converge.
///
/// Each node owns one variable and writes random values to it; after all
/// traffic drains, every replica holds each owner's last value.
#[test]
fn test_single_writer_variables_converge() {
    let (_network, mut nodes, _seen) = cluster(4);
    let mut rng = rand::thread_rng();

    for node in nodes.iter_mut() {
        let name = format!("owned_{}", node.rank());
        node.subscribe(&name).unwrap();
    }
    drain_all(&mut nodes);

    let mut last: HashMap<String, i32> = HashMap::new();
    for _ in 0..200 {
        let idx = rng.gen_range(0..nodes.len());
        let value = rng.gen_range(0..1_000_000);
        let name = format!("owned_{}", idx);
        nodes[idx].write(&name, value).unwrap();
        last.insert(name, value);

        if rng.gen_bool(0.3) {
            let reader = rng.gen_range(0..nodes.len());
            nodes[reader].try_poll().unwrap();
        }
    }
    drain_all(&mut nodes);

    for node in &nodes {
        for (name, value) in &last {
            assert_eq!(node.get(name), *value, "rank {} var {}", node.rank(), name);
        }
    }
}

/// Test: threaded runners propagate and stop deterministically.
#[test]
fn test_threaded_runners() {
    let (network, nodes, seen) = cluster(3);
    // Endpoints own their links; the runners must not depend on the network.
    drop(network);
    let config = RunnerConfig {
        poll_interval: Duration::from_millis(1),
        command_timeout: Duration::from_secs(2),
    };

    let mut handles: Vec<_> = nodes
        .into_iter()
        .map(|node| spawn_node(node, config.clone()).unwrap())
        .collect();

    handles[0].subscribe("v").unwrap();
    handles[0].write("v", 42).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    for handle in &handles[1..] {
        while handle.get("v").unwrap() != VarState::Set(42) {
            assert!(Instant::now() < deadline, "node {} never saw the update", handle.rank());
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    for handle in handles.iter_mut() {
        let stats = handle.stop().unwrap();
        if handle.rank() != 0 {
            assert_eq!(stats.updates_received, 1);
            assert_eq!(stats.subscriptions_received, 1);
        }
    }

    for rank in 1..3 {
        assert_eq!(
            *seen[rank].lock().unwrap(),
            vec![("v".to_string(), 42, rank as ProcessId)]
        );
    }
}

/// Test: names far larger than a typical frame still subscribe and propagate.
#[test]
fn test_long_name_write_propagates() {
    let (_network, mut nodes, seen) = cluster(2);
    let name = "x".repeat(70 * 1024);

    nodes[0].subscribe(&name).unwrap();
    nodes[0].write(&name, 11).unwrap();
    drain_all(&mut nodes);

    assert_eq!(nodes[1].get(&name), 11);
    assert_eq!(*seen[1].lock().unwrap(), vec![(name, 11, 1)]);
}
