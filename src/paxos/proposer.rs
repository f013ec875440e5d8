/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Proposer: drives the three-phase negotiation (Prepare, Accept, Confirm) that decides one
//! instance of the replicated log.
//!
//! Each negotiation attempt is modelled as a small state machine over a single
//! [`ProposeContext`]: Phase 1 ([`force_prepare`](Proposer::force_prepare)) either wins a promise
//! quorum, discovers the instance is already decided, or runs out of retries; Phase 2
//! ([`accept`](Proposer::accept)) replicates the chosen value; Phase 3 seals the decision with a
//! fire-and-forget Confirm broadcast and a local delivery to this node's own Learner.
//!
//! Negotiations are serialised by a round lock, and every phase response is matched against the
//! context's `(instance_id, proposal_no)` so that stragglers from abandoned rounds are discarded.

use rand::Rng;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::events::{AcceptEvent, Event, PrepareEvent, ProposeEvent};
use crate::messages::{AcceptReq, ConfirmReq, PrepareReq};
use crate::networking::{Network, PhaseResponse, PhaseResponseStub, SenderHandle};
use crate::state::kv_store::LogStore;
use crate::types::basic::{GroupName, InstanceId, ProposalNo};
use crate::types::instance::{InstanceState, Proposal};
use crate::types::quorum::{QuorumState, QuorumTracker};

use super::master_sm::MASTER_GROUP;
use super::{PaxosNode, Roles};

/// How a negotiation concluded, as reported to [`ProposeDone::negotiation_done`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// The value was decided and confirms were broadcast.
    Pass,
    /// The round could not conclude within its retry budget. The value may or may not have been
    /// decided; the caller decides whether to resubmit.
    Unknown,
}

/// Client callback for a proposal's lifecycle: once when the negotiation concludes, and once
/// more when the decided value has been applied to the state machine on this node.
pub trait ProposeDone: Send + 'static {
    fn negotiation_done(&self, outcome: NegotiationOutcome);

    /// Fired by the Learner after the instance applied. `result` is the state machine's output,
    /// or `None` if the state machine failed or the decided value was a noop.
    fn apply_done(&self, result: Option<Vec<u8>>);
}

/// Reasons a proposal is rejected before any network round starts.
#[derive(Debug, PartialEq, Eq)]
pub enum ProposeError {
    /// Instance allocation is master-only, and this node is not the current master (or no master
    /// is elected yet).
    NotMaster,
}

impl std::fmt::Display for ProposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposeError::NotMaster => write!(f, "this node is not the elected master"),
        }
    }
}

/// How a recovery boost concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoostOutcome {
    /// The instance is now confirmed locally, either because a peer had already decided it or
    /// because this node drove a value (possibly the noop) to a decision.
    Decided,
    /// The retry budget ran out without a decision. Callers may boost again with a fresh budget.
    Refused,
}

/// Phase 1 verdict over one [`ProposeContext`].
pub(crate) enum PrepareOutcome {
    /// A promise quorum was won. If any acceptor reported an accepted value, the context's
    /// proposals have been replaced by the highest-numbered one (the pick-highest rule).
    Granted,
    /// Some acceptor already holds the instance as confirmed, with this value.
    Confirmed(Vec<Proposal>),
    /// The retry budget ran out.
    Refused,
}

/// Phase 2 verdict over one [`ProposeContext`].
pub(crate) enum AcceptOutcome {
    Granted,
    Refused,
}

/// Per-attempt scratch space carried across phases.
pub(crate) struct ProposeContext {
    pub(crate) instance_id: InstanceId,
    pub(crate) proposal_no: ProposalNo,
    pub(crate) proposals: Vec<Proposal>,
    pub(crate) times: u32,
}

impl ProposeContext {
    pub(crate) fn new(instance_id: InstanceId, proposals: Vec<Proposal>, times: u32) -> Self {
        Self {
            instance_id,
            proposal_no: ProposalNo::init(),
            proposals,
            times,
        }
    }
}

pub struct Proposer<N: Network, K: LogStore> {
    node: Arc<PaxosNode>,
    roles: Weak<Roles<N, K>>,
    sender: Mutex<SenderHandle<N>>,
    responses: Mutex<PhaseResponseStub>,
    round_lock: Mutex<()>,
    round_timeout: Duration,
    retry: u32,
    retry_backoff: Duration,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: LogStore> Proposer<N, K> {
    pub(crate) fn new(
        node: Arc<PaxosNode>,
        roles: Weak<Roles<N, K>>,
        sender: SenderHandle<N>,
        responses: PhaseResponseStub,
        round_timeout: Duration,
        retry: u32,
        retry_backoff: Duration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            node,
            roles,
            sender: Mutex::new(sender),
            responses: Mutex::new(responses),
            round_lock: Mutex::new(()),
            round_timeout,
            retry,
            retry_backoff,
            event_publisher,
        }
    }

    /// Drive `data` through consensus on a fresh instance.
    ///
    /// Returns immediately with [`ProposeError::NotMaster`] if this node may not allocate
    /// instances; otherwise blocks for at most `round_timeout x retry` per phase budget and
    /// reports the outcome through `done`.
    pub fn propose(
        &self,
        group: GroupName,
        data: Vec<u8>,
        done: Box<dyn ProposeDone>,
    ) -> Result<(), ProposeError> {
        // Elections must run on nodes that are not (yet) the master, so the master group is
        // exempt from the allocation rule.
        if group.str() != MASTER_GROUP {
            match self.node.member_view().master() {
                Some(master) if master.id() == self.node.id() => (),
                _ => return Err(ProposeError::NotMaster),
            }
        }

        let _round = self.round_lock.lock().unwrap();
        let client_proposals = vec![Proposal::new(group.clone(), data)];
        let mut ctx = ProposeContext::new(
            self.node.next_instance_id(),
            client_proposals.clone(),
            self.retry,
        );

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            instance_id: ctx.instance_id,
            proposal_no: self.node.cur_proposal_no() + 1,
            group,
        })
        .publish(&self.event_publisher);

        loop {
            match self.force_prepare(&mut ctx) {
                PrepareOutcome::Refused => {
                    done.negotiation_done(NegotiationOutcome::Unknown);
                    return Ok(());
                }
                PrepareOutcome::Confirmed(values) => {
                    // The chosen instance was decided elsewhere. Seal that knowledge locally and
                    // retry the client's value on the next instance, within the same budget.
                    self.seal(ctx.instance_id, values, None, false);
                    self.node.advance_instance_id(ctx.instance_id);
                    if ctx.times == 0 {
                        done.negotiation_done(NegotiationOutcome::Unknown);
                        return Ok(());
                    }
                    let times = ctx.times - 1;
                    ctx = ProposeContext::new(
                        self.node.next_instance_id(),
                        client_proposals.clone(),
                        times,
                    );
                    continue;
                }
                PrepareOutcome::Granted => {
                    self.node.advance_instance_id(ctx.instance_id);
                }
            }

            match self.accept(&mut ctx) {
                AcceptOutcome::Granted => {
                    self.seal(ctx.instance_id, ctx.proposals, Some(done), true);
                    return Ok(());
                }
                AcceptOutcome::Refused => {
                    if ctx.times == 0 {
                        done.negotiation_done(NegotiationOutcome::Unknown);
                        return Ok(());
                    }
                    ctx.times -= 1;
                    self.backoff();
                }
            }
        }
    }

    /// Re-drive consensus for an existing instance, proposing `default_proposals` unless Phase 1
    /// uncovers a value that must be preserved. Used by the Learner to collapse log gaps.
    pub fn try_boost(
        &self,
        instance_id: InstanceId,
        default_proposals: Vec<Proposal>,
        done: Box<dyn ProposeDone>,
    ) -> BoostOutcome {
        let _round = self.round_lock.lock().unwrap();
        let mut ctx =
            ProposeContext::new(instance_id, default_proposals, self.retry.saturating_sub(1));

        loop {
            match self.force_prepare(&mut ctx) {
                PrepareOutcome::Refused => {
                    done.negotiation_done(NegotiationOutcome::Unknown);
                    return BoostOutcome::Refused;
                }
                PrepareOutcome::Confirmed(values) => {
                    // A peer already decided this instance: what it decided is what gets
                    // persisted, never the boost's placeholder.
                    self.seal(ctx.instance_id, values, Some(done), false);
                    return BoostOutcome::Decided;
                }
                PrepareOutcome::Granted => {
                    self.node.advance_instance_id(ctx.instance_id);
                }
            }

            match self.accept(&mut ctx) {
                AcceptOutcome::Granted => {
                    self.seal(ctx.instance_id, ctx.proposals, Some(done), true);
                    return BoostOutcome::Decided;
                }
                AcceptOutcome::Refused => {
                    if ctx.times == 0 {
                        done.negotiation_done(NegotiationOutcome::Unknown);
                        return BoostOutcome::Refused;
                    }
                    ctx.times -= 1;
                    self.backoff();
                }
            }
        }
    }

    /// Phase 1. Selects a fresh proposal number, broadcasts Prepare to a snapshot of the member
    /// view, and collects promises until the quorum resolves or the round deadline passes.
    /// Retries with larger numbers, after a randomised backoff, while the context's budget lasts.
    pub(crate) fn force_prepare(&self, ctx: &mut ProposeContext) -> PrepareOutcome {
        let responses = self.responses.lock().unwrap();

        loop {
            ctx.proposal_no = self.node.cur_proposal_no() + 1;
            responses.drain();

            let snapshot = self.node.member_view().create_ref();
            let mut quorum = QuorumTracker::new(&snapshot);
            let req = PrepareReq {
                instance_id: ctx.instance_id,
                proposal_no: ctx.proposal_no,
            };
            let mut sender = self.sender.lock().unwrap().clone();
            for member in snapshot.members() {
                sender.send(member.id(), req.clone());
            }

            Event::Prepare(PrepareEvent {
                timestamp: SystemTime::now(),
                instance_id: ctx.instance_id,
                proposal_no: ctx.proposal_no,
            })
            .publish(&self.event_publisher);

            let deadline = Instant::now() + self.round_timeout;
            let mut picked: Option<(ProposalNo, Vec<Proposal>)> = None;

            while quorum.state() == QuorumState::Pending {
                match responses.recv_response(deadline) {
                    Ok((origin, PhaseResponse::Prepare(res)))
                        if res.instance_id == ctx.instance_id
                            && res.proposal_no == ctx.proposal_no =>
                    {
                        if res.state == InstanceState::Confirmed {
                            return PrepareOutcome::Confirmed(res.accepted_value);
                        }
                        if res.ok {
                            let higher = picked
                                .as_ref()
                                .map_or(true, |(no, _)| res.max_accepted_proposal_no > *no);
                            if !res.accepted_value.is_empty() && higher {
                                picked =
                                    Some((res.max_accepted_proposal_no, res.accepted_value));
                            }
                            quorum.grant(&origin);
                        } else {
                            self.node.observe_proposal_no(res.cur_proposal_no);
                            quorum.refuse(&origin);
                        }
                    }
                    // Stale responses from abandoned rounds, and Phase 2 stragglers.
                    Ok(_) => continue,
                    // Peers that have not answered by the deadline count as refusals.
                    Err(_) => break,
                }
            }

            if quorum.state() == QuorumState::Pass {
                if let Some((_, value)) = picked {
                    ctx.proposals = value;
                }
                return PrepareOutcome::Granted;
            }

            if ctx.times == 0 {
                return PrepareOutcome::Refused;
            }
            ctx.times -= 1;
            self.backoff();
        }
    }

    /// Phase 2. Broadcasts the context's value under its granted proposal number and collects
    /// acceptances until the quorum resolves or the round deadline passes.
    pub(crate) fn accept(&self, ctx: &mut ProposeContext) -> AcceptOutcome {
        let responses = self.responses.lock().unwrap();
        responses.drain();

        let snapshot = self.node.member_view().create_ref();
        let mut quorum = QuorumTracker::new(&snapshot);
        let req = AcceptReq {
            instance_id: ctx.instance_id,
            proposal_no: ctx.proposal_no,
            values: ctx.proposals.clone(),
        };
        let mut sender = self.sender.lock().unwrap().clone();
        for member in snapshot.members() {
            sender.send(member.id(), req.clone());
        }

        Event::Accept(AcceptEvent {
            timestamp: SystemTime::now(),
            instance_id: ctx.instance_id,
            proposal_no: ctx.proposal_no,
        })
        .publish(&self.event_publisher);

        let deadline = Instant::now() + self.round_timeout;

        while quorum.state() == QuorumState::Pending {
            match responses.recv_response(deadline) {
                Ok((origin, PhaseResponse::Accept(res)))
                    if res.instance_id == ctx.instance_id
                        && res.proposal_no == ctx.proposal_no =>
                {
                    if res.ok {
                        quorum.grant(&origin);
                    } else {
                        self.node.observe_proposal_no(res.cur_proposal_no);
                        quorum.refuse(&origin);
                    }
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        match quorum.state() {
            QuorumState::Pass => AcceptOutcome::Granted,
            _ => AcceptOutcome::Refused,
        }
    }

    /// Phase 3. Registers the apply callback, delivers the decided value to this node's own
    /// Learner, and (for decisions this node drove) fire-and-forgets Confirm to every other
    /// member. Confirm failures are never retried: the Learner's pull-based recovery is the
    /// authority for holes.
    fn seal(
        &self,
        instance_id: InstanceId,
        values: Vec<Proposal>,
        done: Option<Box<dyn ProposeDone>>,
        broadcast: bool,
    ) {
        let roles = self.roles.upgrade().expect("role registry dropped");

        if let Some(done) = done {
            done.negotiation_done(NegotiationOutcome::Pass);
            roles.learner().register_done(instance_id, done);
        }

        let req = ConfirmReq {
            node_id: self.node.id().clone(),
            instance_id,
            values: values.clone(),
        };
        roles.learner().handle_confirm_request(req);

        if broadcast {
            roles.learner().confirm(instance_id, values);
        }
    }

    fn backoff(&self) {
        let max = self.retry_backoff.as_millis().max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..max);
        thread::sleep(Duration::from_millis(jitter));
    }
}
