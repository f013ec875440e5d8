//! Shared scaffolding for the integration tests: an in-memory log store, a channel-backed mock
//! network with link fault injection, a counter app, and a node wrapper.

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;

pub(crate) mod node;

pub(crate) mod number_app;

use std::time::{Duration, Instant};

use multipaxos_rs::types::endpoint::{Endpoint, NodeId};

use self::node::Node;

pub(crate) fn make_endpoints(names: &[&str]) -> Vec<Endpoint> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Endpoint::new(NodeId::new(name), "127.0.0.1", 9000 + i as u16))
        .collect()
}

/// Poll until exactly one node considers itself master and return its index.
pub(crate) fn await_master(nodes: &[Node], timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(index) = nodes.iter().position(|node| node.is_master()) {
            return index;
        }
        if Instant::now() > deadline {
            panic!("no node became master within {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Poll until `condition` holds or panic after `timeout`.
pub(crate) fn await_condition(timeout: Duration, what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not reached within {:?}: {}", timeout, what);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
