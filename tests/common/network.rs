//! A "mock" (totally local) network for passing around MultiPaxos-rs messages, with link-level
//! fault injection for partition scenarios.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use multipaxos_rs::{
    messages::Message,
    networking::Network,
    types::endpoint::{Endpoint, NodeId},
};

/// A network stub that passes messages to and from nodes using channels.
///
/// ## Fault injection
///
/// All stubs created by one [`mock_network`] call share a set of severed directed links. A
/// message sent over a severed link is silently dropped, which is how tests stage partitions;
/// [`heal`](NetworkStub::heal) reconnects everything.
///
/// ## Limitations
///
/// `NetworkStub`'s implementation of the [`Network`] trait's `init_members` and `update_members`
/// methods are no-ops. As a consequence, the set of peers reachable from a given `NetworkStub` is
/// fixed on construction by [`mock_network`]. Tests that add members must "plan ahead" and create
/// the mock network with extra ids, beyond the ones for the replicas that are started initially.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_id: NodeId,
    all_peers: HashMap<NodeId, Sender<(NodeId, Message)>>,
    inbox: Arc<Mutex<Receiver<(NodeId, Message)>>>,
    severed: Arc<Mutex<HashSet<(NodeId, NodeId)>>>,
}

impl Network for NetworkStub {
    fn init_members(&mut self, _: Vec<Endpoint>) {}

    fn update_members(&mut self, _: Vec<Endpoint>) {}

    fn send(&mut self, peer: &NodeId, message: Message) {
        if self
            .severed
            .lock()
            .unwrap()
            .contains(&(self.my_id.clone(), peer.clone()))
        {
            return;
        }
        if let Some(peer) = self.all_peers.get(peer) {
            let _ = peer.send((self.my_id.clone(), message));
        }
    }

    fn recv(&mut self) -> Option<(NodeId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

impl NetworkStub {
    /// Cut both directions of every link between `node` and the rest of the network.
    pub(crate) fn isolate(&self, node: &NodeId) {
        let mut severed = self.severed.lock().unwrap();
        for peer in self.all_peers.keys() {
            if peer != node {
                severed.insert((node.clone(), peer.clone()));
                severed.insert((peer.clone(), node.clone()));
            }
        }
    }

    /// Reconnect every severed link.
    pub(crate) fn heal(&self) {
        self.severed.lock().unwrap().clear();
    }
}

/// Create a vector of `NetworkStub`s, connecting the provided set of `peers`.
///
/// `NetworkStub`s feature in the returned vector in the same order as the provided `peers`, i.e.,
/// the i-th network stub is the network stub for the i-th peer.
pub(crate) fn mock_network(peers: impl Iterator<Item = NodeId>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(NodeId, Receiver<(NodeId, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer.clone(), sender);

            (peer, receiver)
        })
        .collect();

    let severed = Arc::new(Mutex::new(HashSet::new()));

    peer_and_inboxes
        .into_iter()
        .map(|(my_id, inbox)| NetworkStub {
            my_id,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            severed: severed.clone(),
        })
        .collect()
}
