use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    time::Duration,
};

use borsh::BorshSerialize;
use multipaxos_rs::{
    events::ApplyEvent,
    paxos::proposer::{NegotiationOutcome, ProposeDone, ProposeError},
    replica::{Configuration, Replica, ReplicaSpec},
    types::{
        basic::InstanceId,
        endpoint::{Endpoint, NodeId},
    },
};

use crate::common::{
    mem_db::MemDB,
    network::NetworkStub,
    number_app::{NumberApp, NumberAppTransaction},
};

/// Things the Nodes will have in common:
/// - Member list.
/// - Configuration timings.
///
/// Things that they will differ in:
/// - App instance.
/// - Network instance.
/// - LogStore.
/// - Endpoint.
pub(crate) struct Node {
    id: NodeId,
    number: Arc<Mutex<u32>>,
    history: Arc<Mutex<Vec<u32>>>,
    replica: Replica<NetworkStub, MemDB>,
}

impl Node {
    pub(crate) fn new(me: Endpoint, members: Vec<Endpoint>, network: NetworkStub) -> Node {
        let configuration = Configuration::builder()
            .me(me.clone())
            .members(members)
            .round_timeout(Duration::from_millis(300))
            .retry(3)
            .retry_backoff(Duration::from_millis(20))
            .election_jitter_min(Duration::from_millis(300))
            .election_jitter_max(Duration::from_millis(500))
            .heartbeat_interval(Duration::from_millis(50))
            .log_events(true)
            .build();

        let number = Arc::new(Mutex::new(0));
        let history = Arc::new(Mutex::new(Vec::new()));

        let apply_handler = |apply_event: &ApplyEvent| {
            log::debug!("applied instance {}", apply_event.instance_id)
        };

        let replica = ReplicaSpec::builder()
            .app(NumberApp::new(number.clone(), history.clone()))
            .network(network)
            .log_store(MemDB::new())
            .configuration(configuration)
            .on_apply(apply_handler)
            .build()
            .start();

        Node {
            id: me.id().clone(),
            number,
            history,
            replica,
        }
    }

    /// Propose a transaction on this node. Returns a receiver that yields once the decided
    /// command has applied locally.
    pub(crate) fn submit(
        &self,
        transaction: NumberAppTransaction,
    ) -> Result<Receiver<Option<Vec<u8>>>, ProposeError> {
        let (applied, receiver) = mpsc::channel();
        self.replica.propose(
            transaction.try_to_vec().unwrap(),
            Box::new(TestDone { applied }),
        )?;
        Ok(receiver)
    }

    pub(crate) fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn number(&self) -> u32 {
        *self.number.lock().unwrap()
    }

    pub(crate) fn history(&self) -> Vec<u32> {
        self.history.lock().unwrap().clone()
    }

    pub(crate) fn master(&self) -> Option<NodeId> {
        self.replica
            .member_view()
            .master()
            .map(|endpoint| endpoint.id().clone())
    }

    pub(crate) fn is_master(&self) -> bool {
        self.master().as_ref() == Some(&self.id)
    }

    pub(crate) fn member_count(&self) -> usize {
        self.replica.member_view().len()
    }

    pub(crate) fn max_applied_instance_id(&self) -> InstanceId {
        self.replica.max_applied_instance_id()
    }
}

struct TestDone {
    applied: Sender<Option<Vec<u8>>>,
}

impl ProposeDone for TestDone {
    fn negotiation_done(&self, outcome: NegotiationOutcome) {
        log::debug!("test proposal negotiation ended: {:?}", outcome);
    }

    fn apply_done(&self, result: Option<Vec<u8>>) {
        let _ = self.applied.send(result);
    }
}
