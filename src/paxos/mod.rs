/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The three role machines of the consensus core - [Proposer](proposer::Proposer),
//! [Learner](learner::Learner), and [Master](master::Master) - together with the
//! [Acceptor](acceptor::Acceptor) that answers their phase requests, the node-wide counters they
//! share, and the registry that wires them together.
//!
//! ## Role registry
//!
//! The roles mutually invoke each other: the Master proposes elections through the Proposer, the
//! Proposer hands decided values to the Learner, and the Learner re-drives consensus through the
//! Proposer when it discovers a log gap. [`Roles`] breaks the construction-time cycle: role
//! objects are allocated first, placed into the registry, and only then do they reach each other
//! through `Weak` handles that are upgraded on use.

pub mod acceptor;

pub mod learner;

pub mod master;

pub mod master_sm;

pub mod proposer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::networking::Network;
use crate::state::kv_store::LogStore;
use crate::types::basic::{InstanceId, ProposalNo};
use crate::types::endpoint::{Endpoint, NodeId};
use crate::types::member_view::MemberView;

use self::acceptor::Acceptor;
use self::learner::Learner;
use self::master::Master;
use self::proposer::Proposer;

/// State every role of the local node shares: the node's identity, its membership view, and the
/// two node-wide monotonic counters.
pub struct PaxosNode {
    self_endpoint: Endpoint,
    member_view: MemberView,
    cur_proposal_no: AtomicU64,
    cur_instance_id: AtomicU64,
}

impl PaxosNode {
    pub fn new(self_endpoint: Endpoint, members: Vec<Endpoint>) -> Self {
        Self {
            self_endpoint,
            member_view: MemberView::new(members),
            cur_proposal_no: AtomicU64::new(ProposalNo::init().int()),
            cur_instance_id: AtomicU64::new(InstanceId::init().int()),
        }
    }

    pub fn id(&self) -> &NodeId {
        self.self_endpoint.id()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.self_endpoint
    }

    pub fn member_view(&self) -> &MemberView {
        &self.member_view
    }

    /// The highest proposal number this node has used or observed.
    pub fn cur_proposal_no(&self) -> ProposalNo {
        ProposalNo::new(self.cur_proposal_no.load(Ordering::SeqCst))
    }

    /// Raise the node's proposal number to at least `no` and return the value it held before.
    /// The counter never decreases, which is what keeps proposal numbers monotonic on every node.
    pub(crate) fn observe_proposal_no(&self, no: ProposalNo) -> ProposalNo {
        ProposalNo::new(self.cur_proposal_no.fetch_max(no.int(), Ordering::SeqCst))
    }

    /// The highest instance id this node has allocated or seen confirmed.
    pub fn cur_instance_id(&self) -> InstanceId {
        InstanceId::new(self.cur_instance_id.load(Ordering::SeqCst))
    }

    /// The id a fresh negotiation on this node should target.
    pub(crate) fn next_instance_id(&self) -> InstanceId {
        self.cur_instance_id() + 1
    }

    /// Raise the instance counter to at least `id`. Called on a successful Prepare quorum and
    /// whenever a confirm for a higher id is seen.
    pub(crate) fn advance_instance_id(&self, id: InstanceId) {
        self.cur_instance_id.fetch_max(id.int(), Ordering::SeqCst);
    }
}

/// Lookup of the role instances of one node. Wired exactly once, in
/// [`Replica::start`](crate::replica::ReplicaSpec::start).
pub(crate) struct Roles<N: Network, K: LogStore> {
    proposer: OnceLock<Proposer<N, K>>,
    acceptor: OnceLock<Acceptor<K>>,
    learner: OnceLock<Learner<N, K>>,
    master: OnceLock<Master<N, K>>,
}

impl<N: Network, K: LogStore> Roles<N, K> {
    pub(crate) fn empty() -> Self {
        Self {
            proposer: OnceLock::new(),
            acceptor: OnceLock::new(),
            learner: OnceLock::new(),
            master: OnceLock::new(),
        }
    }

    pub(crate) fn wire(
        &self,
        proposer: Proposer<N, K>,
        acceptor: Acceptor<K>,
        learner: Learner<N, K>,
        master: Master<N, K>,
    ) {
        let _ = self.proposer.set(proposer);
        let _ = self.acceptor.set(acceptor);
        let _ = self.learner.set(learner);
        let _ = self.master.set(master);
    }

    pub(crate) fn proposer(&self) -> &Proposer<N, K> {
        self.proposer.get().expect("roles are wired before use")
    }

    pub(crate) fn acceptor(&self) -> &Acceptor<K> {
        self.acceptor.get().expect("roles are wired before use")
    }

    pub(crate) fn learner(&self) -> &Learner<N, K> {
        self.learner.get().expect("roles are wired before use")
    }

    pub(crate) fn master(&self) -> &Master<N, K> {
        self.master.get().expect("roles are wired before use")
    }
}
