//! The test suite for MultiPaxos-rs involves an [app](common::number_app::NumberApp) that keeps
//! track of a single number in its state, which is initially 0. Tests push transactions to this
//! app to change the number, then query every node's state to check that consensus decisions
//! arrive everywhere and in the same order.
//!
//! The replicas used in this test suite use a mock [NetworkStub](common::network::NetworkStub)
//! and a mock [MemDB](common::mem_db::MemDB) key-value store. These use channels to simulate
//! communication and a hashmap to simulate persistence, and thus never leave any artifacts.

mod common;

use std::time::Duration;

use log::LevelFilter;
use multipaxos_rs::messages::{ChangeMemberReq, ChangeOp};
use multipaxos_rs::networking::Network;
use multipaxos_rs::paxos::proposer::ProposeError;

use common::logging::setup_logger;
use common::network::mock_network;
use common::node::Node;
use common::number_app::NumberAppTransaction;
use common::{await_condition, await_master, make_endpoints};

/// Propose on whichever node currently accepts proposals. Masters move around during partition
/// and crash tests, so a fixed target would race the election.
fn submit_on_master(
    nodes: &[Node],
    transaction: NumberAppTransaction,
) -> std::sync::mpsc::Receiver<Option<Vec<u8>>> {
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        for node in nodes {
            match node.submit(transaction.clone()) {
                Ok(receiver) => return receiver,
                Err(ProposeError::NotMaster) => continue,
            }
        }
        if std::time::Instant::now() > deadline {
            panic!("no node accepted the proposal within 20s");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn solo_cluster_integration_test() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0"]);
    let mut networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let nodes = [Node::new(
        endpoints[0].clone(),
        endpoints.clone(),
        networks.remove(0),
    )];

    // A solo cluster elects itself as soon as the boot delay passes.
    await_master(&nodes, Duration::from_secs(10));

    let applied = nodes[0].submit(NumberAppTransaction::Increment).unwrap();
    let result = applied
        .recv_timeout(Duration::from_secs(5))
        .expect("the decided command applies locally");

    assert_eq!(result, Some(1u32.to_le_bytes().to_vec()));
    assert_eq!(nodes[0].number(), 1);
    assert_eq!(nodes[0].history(), vec![1]);
}

#[test]
fn three_node_replication_integration_test() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "n1", "n2"]);
    let networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let nodes: Vec<Node> = endpoints
        .iter()
        .zip(networks)
        .map(|(endpoint, network)| Node::new(endpoint.clone(), endpoints.clone(), network))
        .collect();

    let master = await_master(&nodes, Duration::from_secs(10));

    // Apply the first command before submitting the second, so every history must read [1, 6].
    let applied = nodes[master].submit(NumberAppTransaction::Increment).unwrap();
    applied
        .recv_timeout(Duration::from_secs(5))
        .expect("first command applies on the master");

    let applied = nodes[master].submit(NumberAppTransaction::Add(5)).unwrap();
    applied
        .recv_timeout(Duration::from_secs(5))
        .expect("second command applies on the master");

    await_condition(Duration::from_secs(10), "all nodes apply [1, 6]", || {
        nodes
            .iter()
            .all(|node| node.number() == 6 && node.history() == vec![1, 6])
    });
}

#[test]
fn minority_partition_integration_test() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "n1", "n2"]);
    let networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let fault_handle = networks[0].clone();
    let nodes: Vec<Node> = endpoints
        .iter()
        .zip(networks)
        .map(|(endpoint, network)| Node::new(endpoint.clone(), endpoints.clone(), network))
        .collect();

    let master = await_master(&nodes, Duration::from_secs(10));
    let victim = (master + 1) % nodes.len();

    fault_handle.isolate(nodes[victim].id());

    // The majority keeps deciding while the victim is cut off.
    for _ in 0..2 {
        let applied = submit_on_master(&nodes, NumberAppTransaction::Increment);
        applied
            .recv_timeout(Duration::from_secs(10))
            .expect("the majority side keeps applying");
    }
    assert_eq!(nodes[victim].number(), 0);

    fault_handle.heal();

    // The next decision's confirm exposes the victim's gap, and it catches up in order.
    let applied = submit_on_master(&nodes, NumberAppTransaction::Increment);
    applied
        .recv_timeout(Duration::from_secs(10))
        .expect("the healed cluster keeps applying");

    await_condition(
        Duration::from_secs(20),
        "the victim catches up in order",
        || {
            nodes
                .iter()
                .all(|node| node.number() == 3 && node.history() == vec![1, 2, 3])
        },
    );
}

#[test]
fn leader_crash_integration_test() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "n1", "n2"]);
    let networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let mut nodes: Vec<Node> = endpoints
        .iter()
        .zip(networks)
        .map(|(endpoint, network)| Node::new(endpoint.clone(), endpoints.clone(), network))
        .collect();

    let master = await_master(&nodes, Duration::from_secs(10));

    let applied = nodes[master].submit(NumberAppTransaction::Increment).unwrap();
    applied
        .recv_timeout(Duration::from_secs(5))
        .expect("the first command applies before the crash");

    // Crash the leader. The survivors stop seeing heartbeats, elect a new master among
    // themselves (two of three is still a majority), and continue deciding.
    let crashed = nodes.remove(master);
    drop(crashed);

    let applied = submit_on_master(&nodes, NumberAppTransaction::Increment);
    applied
        .recv_timeout(Duration::from_secs(10))
        .expect("the survivors keep applying");

    await_condition(
        Duration::from_secs(20),
        "both survivors apply [1, 2]",
        || {
            nodes
                .iter()
                .all(|node| node.number() == 2 && node.history() == vec![1, 2])
        },
    );
}

#[test]
fn member_add_integration_test() {
    setup_logger(LevelFilter::Debug);

    // One extra id in the mock network for the joining node, and one for the admin harness
    // that submits the change request.
    let endpoints = make_endpoints(&["n0", "n1", "n2", "n3", "admin"]);
    let cluster = endpoints[0..3].to_vec();
    let mut networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let mut admin = networks.remove(4);
    let _joining = networks.remove(3);
    let nodes: Vec<Node> = cluster
        .iter()
        .zip(networks)
        .map(|(endpoint, network)| Node::new(endpoint.clone(), cluster.clone(), network))
        .collect();

    let master = await_master(&nodes, Duration::from_secs(10));

    admin.send(
        nodes[master].id(),
        ChangeMemberReq {
            op: ChangeOp::Add,
            change_target: endpoints[3].clone(),
        }
        .into(),
    );

    await_condition(
        Duration::from_secs(10),
        "every node's view gains the member",
        || nodes.iter().all(|node| node.member_count() == 4),
    );
}
