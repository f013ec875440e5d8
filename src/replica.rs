/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that build and start a replica, as well as [the type](Replica) which keeps the
//! replica alive.
//!
//! MultiPaxos-rs works to safely replicate a state machine in multiple processes. In our
//! terminology, these processes are called 'replicas', and each replica is uniquely identified by
//! the [`NodeId`](crate::types::endpoint::NodeId) of its configured [`Endpoint`].
//!
//! A running replica owns five long-lived threads: the network poller, the request server, the
//! Learner's apply worker, and the Master's two timers. Dropping the [`Replica`] shuts them down
//! in an order that respects the channels between them: timers first (no new negotiations), then
//! the apply worker (after state machine images are written), then the request server, then the
//! poller, and the event bus last.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use threadpool::ThreadPool;

use crate::app::{App, APP_GROUP};
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::networking::{
    start_polling, MemberUpdateHandle, Network, PhaseResponseStub, PongStub, SenderHandle,
};
use crate::paxos::acceptor::Acceptor;
use crate::paxos::learner::Learner;
use crate::paxos::master::Master;
use crate::paxos::master_sm::{MasterSm, MASTER_GROUP};
use crate::paxos::proposer::{ProposeDone, ProposeError, Proposer};
use crate::paxos::{PaxosNode, Roles};
use crate::server::start_server;
use crate::state::kv_store::LogStore;
use crate::state::log::Log;
use crate::types::basic::{GroupName, InstanceId};
use crate::types::endpoint::Endpoint;
use crate::types::member_view::MemberViewSnapshot;

/// Configuration: the set of values that determine the behavior of one replica.
#[derive(Clone)]
pub struct Configuration {
    pub me: Endpoint,
    pub members: Vec<Endpoint>,
    pub round_timeout: Duration,
    pub retry: u32,
    pub retry_backoff: Duration,
    pub election_jitter_min: Duration,
    pub election_jitter_max: Duration,
    pub heartbeat_interval: Duration,
    pub log_events: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            me: None,
            members: Vec::new(),
            round_timeout: Duration::from_millis(1000),
            retry: 3,
            retry_backoff: Duration::from_millis(50),
            election_jitter_min: Duration::from_millis(600),
            election_jitter_max: Duration::from_millis(800),
            heartbeat_interval: Duration::from_millis(100),
            log_events: false,
        }
    }
}

pub struct ConfigurationBuilder {
    me: Option<Endpoint>,
    members: Vec<Endpoint>,
    round_timeout: Duration,
    retry: u32,
    retry_backoff: Duration,
    election_jitter_min: Duration,
    election_jitter_max: Duration,
    heartbeat_interval: Duration,
    log_events: bool,
}

impl ConfigurationBuilder {
    pub fn me(mut self, me: Endpoint) -> Self {
        self.me = Some(me);
        self
    }

    pub fn members(mut self, members: Vec<Endpoint>) -> Self {
        self.members = members;
        self
    }

    pub fn round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn election_jitter_min(mut self, election_jitter_min: Duration) -> Self {
        self.election_jitter_min = election_jitter_min;
        self
    }

    pub fn election_jitter_max(mut self, election_jitter_max: Duration) -> Self {
        self.election_jitter_max = election_jitter_max;
        self
    }

    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn log_events(mut self, log_events: bool) -> Self {
        self.log_events = log_events;
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            me: self.me.expect("configuration requires a local endpoint"),
            members: self.members,
            round_timeout: self.round_timeout,
            retry: self.retry,
            retry_backoff: self.retry_backoff,
            election_jitter_min: self.election_jitter_min,
            election_jitter_max: self.election_jitter_max,
            heartbeat_interval: self.heartbeat_interval,
            log_events: self.log_events,
        }
    }
}

/// Specification of a replica: everything needed to start one.
pub struct ReplicaSpec<A: App, N: Network, K: LogStore> {
    app: A,
    network: N,
    log_store: K,
    configuration: Configuration,
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    on_accept: Option<HandlerPtr<AcceptEvent>>,
    on_decide: Option<HandlerPtr<DecideEvent>>,
    on_apply: Option<HandlerPtr<ApplyEvent>>,
    on_learn: Option<HandlerPtr<LearnEvent>>,
    on_start_election: Option<HandlerPtr<StartElectionEvent>>,
    on_change_master: Option<HandlerPtr<ChangeMasterEvent>>,
    on_receive_heartbeat: Option<HandlerPtr<ReceiveHeartbeatEvent>>,
    on_change_member: Option<HandlerPtr<ChangeMemberEvent>>,
}

impl<A: App, N: Network, K: LogStore> ReplicaSpec<A, N, K> {
    pub fn builder() -> ReplicaSpecBuilder<A, N, K> {
        ReplicaSpecBuilder {
            app: None,
            network: None,
            log_store: None,
            configuration: None,
            on_propose: None,
            on_prepare: None,
            on_accept: None,
            on_decide: None,
            on_apply: None,
            on_learn: None,
            on_start_election: None,
            on_change_master: None,
            on_receive_heartbeat: None,
            on_change_member: None,
        }
    }

    /// Start the replica: wire the roles, boot from stored images, and spawn every thread.
    pub fn start(self) -> Replica<N, K> {
        let configuration = self.configuration;
        let mut network = self.network;
        network.init_members(configuration.members.clone());

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, requests, phase_responses, pongs) =
            start_polling(network.clone(), poller_shutdown_receiver);

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_propose,
            self.on_prepare,
            self.on_accept,
            self.on_decide,
            self.on_apply,
            self.on_learn,
            self.on_start_election,
            self.on_change_master,
            self.on_receive_heartbeat,
            self.on_change_member,
        );
        let (event_publisher, event_bus, event_bus_shutdown) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(
                event_handlers,
                event_subscriber,
                event_bus_shutdown_receiver,
            );
            (Some(event_publisher), Some(event_bus), Some(event_bus_shutdown))
        };

        let node = Arc::new(PaxosNode::new(
            configuration.me.clone(),
            configuration.members.clone(),
        ));
        let log = Arc::new(Log::new(self.log_store));
        let pool = ThreadPool::with_name("paxos-background".to_string(), 2);

        let roles = Arc::new(Roles::empty());
        let weak_roles = Arc::downgrade(&roles);

        let proposer = Proposer::new(
            node.clone(),
            weak_roles.clone(),
            SenderHandle::new(network.clone()),
            PhaseResponseStub::new(phase_responses),
            configuration.round_timeout,
            configuration.retry,
            configuration.retry_backoff,
            event_publisher.clone(),
        );
        let acceptor = Acceptor::new(node.clone(), log.clone());
        let learner = Learner::new(
            node.clone(),
            weak_roles.clone(),
            log.clone(),
            SenderHandle::new(network.clone()),
            event_publisher.clone(),
        );
        let master = Master::new(
            node.clone(),
            weak_roles.clone(),
            SenderHandle::new(network.clone()),
            PongStub::new(pongs),
            configuration.round_timeout,
            configuration.retry,
            configuration.election_jitter_min,
            configuration.election_jitter_max,
            configuration.heartbeat_interval,
            event_publisher.clone(),
        );
        roles.wire(proposer, acceptor, learner, master);

        {
            let weak_roles = weak_roles.clone();
            node.member_view()
                .set_master_observer(Box::new(move |new_master| {
                    if let Some(roles) = weak_roles.upgrade() {
                        roles.master().on_change_master(new_master);
                    }
                }));
        }

        roles.learner().load_sm(
            GroupName::new(MASTER_GROUP),
            Box::new(MasterSm::new(
                node.clone(),
                MemberUpdateHandle::new(network.clone()),
                event_publisher.clone(),
            )),
        );
        roles
            .learner()
            .load_sm(GroupName::new(APP_GROUP), Box::new(self.app));

        roles.learner().load_images();
        roles.learner().replay_confirmed();

        let apply_worker = Learner::start_apply_worker(weak_roles.clone());

        let (server_shutdown, server_shutdown_receiver) = mpsc::channel();
        let server = start_server(
            weak_roles,
            requests,
            SenderHandle::new(network),
            pool.clone(),
            server_shutdown_receiver,
        );

        roles.master().start_timers();

        Replica {
            node,
            log,
            roles,
            pool,
            apply_worker: Some(apply_worker),
            server: Some(server),
            server_shutdown,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

pub struct ReplicaSpecBuilder<A: App, N: Network, K: LogStore> {
    app: Option<A>,
    network: Option<N>,
    log_store: Option<K>,
    configuration: Option<Configuration>,
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    on_accept: Option<HandlerPtr<AcceptEvent>>,
    on_decide: Option<HandlerPtr<DecideEvent>>,
    on_apply: Option<HandlerPtr<ApplyEvent>>,
    on_learn: Option<HandlerPtr<LearnEvent>>,
    on_start_election: Option<HandlerPtr<StartElectionEvent>>,
    on_change_master: Option<HandlerPtr<ChangeMasterEvent>>,
    on_receive_heartbeat: Option<HandlerPtr<ReceiveHeartbeatEvent>>,
    on_change_member: Option<HandlerPtr<ChangeMemberEvent>>,
}

impl<A: App, N: Network, K: LogStore> ReplicaSpecBuilder<A, N, K> {
    pub fn app(mut self, app: A) -> Self {
        self.app = Some(app);
        self
    }

    pub fn network(mut self, network: N) -> Self {
        self.network = Some(network);
        self
    }

    pub fn log_store(mut self, log_store: K) -> Self {
        self.log_store = Some(log_store);
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn on_propose(mut self, handler: impl Fn(&ProposeEvent) + Send + 'static) -> Self {
        self.on_propose = Some(Box::new(handler));
        self
    }

    pub fn on_prepare(mut self, handler: impl Fn(&PrepareEvent) + Send + 'static) -> Self {
        self.on_prepare = Some(Box::new(handler));
        self
    }

    pub fn on_accept(mut self, handler: impl Fn(&AcceptEvent) + Send + 'static) -> Self {
        self.on_accept = Some(Box::new(handler));
        self
    }

    pub fn on_decide(mut self, handler: impl Fn(&DecideEvent) + Send + 'static) -> Self {
        self.on_decide = Some(Box::new(handler));
        self
    }

    pub fn on_apply(mut self, handler: impl Fn(&ApplyEvent) + Send + 'static) -> Self {
        self.on_apply = Some(Box::new(handler));
        self
    }

    pub fn on_learn(mut self, handler: impl Fn(&LearnEvent) + Send + 'static) -> Self {
        self.on_learn = Some(Box::new(handler));
        self
    }

    pub fn on_start_election(
        mut self,
        handler: impl Fn(&StartElectionEvent) + Send + 'static,
    ) -> Self {
        self.on_start_election = Some(Box::new(handler));
        self
    }

    pub fn on_change_master(
        mut self,
        handler: impl Fn(&ChangeMasterEvent) + Send + 'static,
    ) -> Self {
        self.on_change_master = Some(Box::new(handler));
        self
    }

    pub fn on_receive_heartbeat(
        mut self,
        handler: impl Fn(&ReceiveHeartbeatEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_heartbeat = Some(Box::new(handler));
        self
    }

    pub fn on_change_member(
        mut self,
        handler: impl Fn(&ChangeMemberEvent) + Send + 'static,
    ) -> Self {
        self.on_change_member = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> ReplicaSpec<A, N, K> {
        ReplicaSpec {
            app: self.app.expect("replica spec requires an app"),
            network: self.network.expect("replica spec requires a network"),
            log_store: self.log_store.expect("replica spec requires a log store"),
            configuration: self
                .configuration
                .expect("replica spec requires a configuration"),
            on_propose: self.on_propose,
            on_prepare: self.on_prepare,
            on_accept: self.on_accept,
            on_decide: self.on_decide,
            on_apply: self.on_apply,
            on_learn: self.on_learn,
            on_start_election: self.on_start_election,
            on_change_master: self.on_change_master,
            on_receive_heartbeat: self.on_receive_heartbeat,
            on_change_member: self.on_change_member,
        }
    }
}

pub struct Replica<N: Network, K: LogStore> {
    node: Arc<PaxosNode>,
    log: Arc<Log<K>>,
    roles: Arc<Roles<N, K>>,
    pool: ThreadPool,
    apply_worker: Option<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
    server_shutdown: Sender<()>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network, K: LogStore> Replica<N, K> {
    /// Submit a command to the user state machine's group. Succeeds only on the elected master;
    /// other nodes fail fast with [`ProposeError::NotMaster`].
    pub fn propose(&self, command: Vec<u8>, done: Box<dyn ProposeDone>) -> Result<(), ProposeError> {
        self.roles
            .proposer()
            .propose(GroupName::new(APP_GROUP), command, done)
    }

    /// The node-wide identity and counters.
    pub fn paxos_node(&self) -> &PaxosNode {
        &self.node
    }

    /// A consistent snapshot of the membership view.
    pub fn member_view(&self) -> MemberViewSnapshot {
        self.node.member_view().create_ref()
    }

    /// Highest instance id applied to the state machines on this node.
    pub fn max_applied_instance_id(&self) -> InstanceId {
        self.log
            .read()
            .max_applied_instance_id()
            .expect("log store is unusable")
    }
}

impl<N: Network, K: LogStore> Drop for Replica<N, K> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important. The timers feed
        // negotiations, negotiations feed the apply queue, and the server and poller answer for
        // both; the event bus drains everything emitted above it.
        self.roles.master().shutdown();

        self.roles.learner().shutdown(&self.pool);
        self.apply_worker.take().unwrap().join().unwrap();

        self.server_shutdown.send(()).unwrap();
        self.server.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            event_bus_shutdown.send(()).unwrap();
        }
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.join().unwrap();
        }
    }
}
