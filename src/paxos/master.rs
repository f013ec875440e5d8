/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Master role: elects a stable distinguished proposer and keeps it alive with heartbeats.
//!
//! Two repeating timers, never both running: the election timer fires
//! [`election`](Master::election) on non-masters, and the heartbeat timer fires
//! [`send_heartbeat`](Master::send_heartbeat) on the elected master. The switch between them is
//! not done where elections run; it happens in [`on_change_master`](Master::on_change_master),
//! which the membership view invokes when an [election op](super::master_sm::MasterOp::Election)
//! applies.
//!
//! ```text
//!    (boot)
//!      |  election timer starts
//!      v
//!   FOLLOWER --election wins--> LEADER
//!      ^                          |
//!      | heartbeat quorum fails   |
//!      +--------------------------+
//! ```

use borsh::BorshSerialize;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use crate::events::{Event, ReceiveHeartbeatEvent, StartElectionEvent};
use crate::messages::{ChangeMemberReq, ChangeOp, Ping};
use crate::networking::{Network, PongStub, SenderHandle};
use crate::state::kv_store::LogStore;
use crate::timer::RepeatedTimer;
use crate::types::basic::GroupName;
use crate::types::endpoint::NodeId;
use crate::types::quorum::{QuorumState, QuorumTracker};

use super::master_sm::{MasterOp, MASTER_GROUP};
use super::proposer::{NegotiationOutcome, ProposeDone};
use super::{PaxosNode, Roles};

/// Delay before the first election attempt after boot; the rest of the system may not be up yet.
const ELECT_BOOT_DELAY: Duration = Duration::from_millis(1000);

/// Slack on top of the heartbeat RPC deadline before a beat's quorum is given up on.
const HEARTBEAT_WAIT_SLACK: Duration = Duration::from_millis(10);

pub struct Master<N: Network, K: LogStore> {
    node: Arc<PaxosNode>,
    roles: Weak<Roles<N, K>>,
    sender: Mutex<SenderHandle<N>>,
    pongs: Mutex<PongStub>,
    electing: AtomicBool,
    elect_timer: Mutex<Option<RepeatedTimer>>,
    heartbeat_timer: Mutex<Option<RepeatedTimer>>,
    round_timeout: Duration,
    retry: u32,
    election_jitter_min: Duration,
    election_jitter_max: Duration,
    heartbeat_interval: Duration,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: LogStore> Master<N, K> {
    pub(crate) fn new(
        node: Arc<PaxosNode>,
        roles: Weak<Roles<N, K>>,
        sender: SenderHandle<N>,
        pongs: PongStub,
        round_timeout: Duration,
        retry: u32,
        election_jitter_min: Duration,
        election_jitter_max: Duration,
        heartbeat_interval: Duration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            node,
            roles,
            sender: Mutex::new(sender),
            pongs: Mutex::new(pongs),
            electing: AtomicBool::new(false),
            elect_timer: Mutex::new(None),
            heartbeat_timer: Mutex::new(None),
            round_timeout,
            retry,
            election_jitter_min,
            election_jitter_max,
            heartbeat_interval,
            event_publisher,
        }
    }

    /// Create and start the timers. Called once the role registry is wired, because the timer
    /// triggers reach this role back through it.
    pub(crate) fn start_timers(&self) {
        let roles = self.roles.clone();
        let jitter_min = self.election_jitter_min;
        let jitter_max = self.election_jitter_max;
        let elect_timer = RepeatedTimer::new(
            "elect-master",
            ELECT_BOOT_DELAY,
            Box::new(move || jittered(jitter_min, jitter_max)),
            Box::new(move || {
                if let Some(roles) = roles.upgrade() {
                    roles.master().election();
                }
            }),
            true,
        );

        let roles = self.roles.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_timer = RepeatedTimer::new(
            "master-heartbeat",
            heartbeat_interval,
            Box::new(move || heartbeat_interval),
            Box::new(move || {
                if let Some(roles) = roles.upgrade() {
                    roles.master().send_heartbeat();
                }
            }),
            false,
        );

        *self.elect_timer.lock().unwrap() = Some(elect_timer);
        *self.heartbeat_timer.lock().unwrap() = Some(heartbeat_timer);
    }

    /// Drop both timers, joining their threads. Called on replica shutdown.
    pub(crate) fn shutdown(&self) {
        self.elect_timer.lock().unwrap().take();
        self.heartbeat_timer.lock().unwrap().take();
    }

    /// Run one election round: propose this node as master and wait for the decision to apply.
    ///
    /// Guarded by a re-entry flag since the timer can fire again while a round is in flight. The
    /// timers are deliberately not touched here; whoever wins, the decision applies on this node
    /// and [`on_change_master`](Master::on_change_master) does the switching.
    pub(crate) fn election(&self) {
        if self
            .electing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let start = Instant::now();

        log::info!("start electing master.");
        Event::StartElection(StartElectionEvent {
            timestamp: SystemTime::now(),
        })
        .publish(&self.event_publisher);

        let op = MasterOp::Election {
            node_id: self.node.id().clone(),
        };
        let (signal, released) = mpsc::channel();

        let roles = match self.roles.upgrade() {
            Some(roles) => roles,
            None => {
                self.electing.store(false, Ordering::SeqCst);
                return;
            }
        };
        let proposed = roles.proposer().propose(
            GroupName::new(MASTER_GROUP),
            op.try_to_vec().expect("master ops are serializable"),
            Box::new(ElectionDone { signal }),
        );

        if proposed.is_ok() {
            // Wait for the op to apply locally (or for the round to end inconclusively); the
            // result itself does not matter here.
            let _ = released.recv_timeout(self.round_timeout * self.retry);
        }

        self.electing.store(false, Ordering::SeqCst);
        log::info!("end election master, cost: {:?}", start.elapsed());
    }

    /// Send one heartbeat to every member and demote if the beat fails to reach a majority.
    pub(crate) fn send_heartbeat(&self) {
        let snapshot = self.node.member_view().create_ref();
        let mut quorum = QuorumTracker::new(&snapshot);
        let ping = Ping {
            node_id: self.node.id().clone(),
            proposal_no: self.node.cur_proposal_no(),
            member_version: snapshot.version(),
        };

        // for self
        if self.on_receive_heartbeat(&ping, true) {
            quorum.grant(self.node.id());
        }

        // for other members
        let pongs = self.pongs.lock().unwrap();
        pongs.drain();
        let mut sender = self.sender.lock().unwrap().clone();
        for member in snapshot.members_without(self.node.id()) {
            sender.send(member.id(), ping.clone());
        }

        let deadline = Instant::now() + self.heartbeat_interval + HEARTBEAT_WAIT_SLACK;
        while quorum.state() == QuorumState::Pending {
            match pongs.recv_pong(deadline) {
                Ok((origin, pong)) => {
                    if pong.ok {
                        quorum.grant(&origin);
                    } else {
                        quorum.refuse(&origin);
                    }
                }
                Err(_) => break,
            }
        }

        if quorum.state() != QuorumState::Pass {
            log::info!("heartbeat lost its majority, restarting master election");
            self.restart_elect();
        }
    }

    /// Validate a heartbeat against the local view: it must come from the node this view holds
    /// as master, at exactly this view's version.
    ///
    /// An accepted heartbeat from a peer re-arms the follower's election timer, so a live master
    /// suppresses elections.
    pub(crate) fn on_receive_heartbeat(&self, ping: &Ping, is_self: bool) -> bool {
        let view = self.node.member_view();
        let accepted = match view.master() {
            Some(master) => *master.id() == ping.node_id && ping.member_version == view.version(),
            None => false,
        };

        Event::ReceiveHeartbeat(ReceiveHeartbeatEvent {
            timestamp: SystemTime::now(),
            origin: ping.node_id.clone(),
            accepted,
        })
        .publish(&self.event_publisher);

        if accepted {
            if !is_self {
                self.reset_elect();
            }
        } else {
            log::info!(
                "rejected heartbeat from node-{}, req.version: {}, local version: {}",
                ping.node_id,
                ping.member_version,
                view.version()
            );
        }
        accepted
    }

    /// Drive a single-node membership change through the `"master"` group. Blocks for the
    /// negotiation, so callers dispatch it off the request path.
    pub(crate) fn change_member(&self, req: ChangeMemberReq) {
        let op = match req.op {
            ChangeOp::Add => MasterOp::AddMember {
                endpoint: req.change_target,
            },
            ChangeOp::Remove => MasterOp::RemoveMember {
                endpoint: req.change_target,
            },
        };

        let roles = match self.roles.upgrade() {
            Some(roles) => roles,
            None => return,
        };
        let proposed = roles.proposer().propose(
            GroupName::new(MASTER_GROUP),
            op.try_to_vec().expect("master ops are serializable"),
            Box::new(ChangeMemberDone {}),
        );
        if let Err(err) = proposed {
            log::warn!("could not propose member change: {}", err);
        }
    }

    /// Switch timers after an election decision applied: the winner heartbeats, everyone else
    /// goes back to (or stays on) the election clock.
    pub(crate) fn on_change_master(&self, new_master: &NodeId) {
        if new_master == self.node.id() {
            self.restart_heartbeat();
        } else {
            self.restart_elect();
        }
    }

    /// Re-arm the election timer with a fresh jittered delay without touching the heartbeat
    /// timer. Used when a valid heartbeat arrives on a follower.
    fn reset_elect(&self) {
        if let Some(timer) = &*self.elect_timer.lock().unwrap() {
            timer.reset(jittered(self.election_jitter_min, self.election_jitter_max));
        }
    }

    fn restart_elect(&self) {
        if let Some(timer) = &*self.heartbeat_timer.lock().unwrap() {
            timer.stop();
        }
        if let Some(timer) = &*self.elect_timer.lock().unwrap() {
            timer.reset(jittered(self.election_jitter_min, self.election_jitter_max));
        }
    }

    fn restart_heartbeat(&self) {
        if let Some(timer) = &*self.elect_timer.lock().unwrap() {
            timer.stop();
        }
        if let Some(timer) = &*self.heartbeat_timer.lock().unwrap() {
            timer.restart();
        }
    }
}

fn jittered(min: Duration, max: Duration) -> Duration {
    let min = min.as_millis() as u64;
    let max = (max.as_millis() as u64).max(min + 1);
    Duration::from_millis(rand::thread_rng().gen_range(min..max))
}

/// Wakes the election round when its proposal either applies or ends inconclusively.
struct ElectionDone {
    signal: Sender<()>,
}

impl ProposeDone for ElectionDone {
    fn negotiation_done(&self, outcome: NegotiationOutcome) {
        if outcome == NegotiationOutcome::Unknown {
            let _ = self.signal.send(());
        }
    }

    fn apply_done(&self, _result: Option<Vec<u8>>) {
        let _ = self.signal.send(());
    }
}

struct ChangeMemberDone {}

impl ProposeDone for ChangeMemberDone {
    fn negotiation_done(&self, outcome: NegotiationOutcome) {
        log::info!("member change negotiation ended: {:?}", outcome);
    }

    fn apply_done(&self, _result: Option<Vec<u8>>) {
        log::info!("member change applied");
    }
}
