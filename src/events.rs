/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local MultiPaxos-rs
//! replica.
//!
//! ## Event enum
//!
//! Significant occurences in the replica include starting a negotiation, deciding an instance,
//! applying a decided value, recovering a log gap, and master changes.
//!
//! Each of these occurences corresponds to a variant of the [event enum](Event), and each variant
//! tuple contains an inner struct type storing information that summarizes the event. This
//! information always includes a timestamp corresponding to the exact time when the event occured.
//!
//! ## Registering event handlers
//!
//! Library users can register event handler closures, which are then internally called by the
//! library's [event bus](crate::event_bus::start_event_bus) thread when the handler's particular
//! event variant happens.
//!
//! Custom event handlers can be registered using the
//! [replica builder pattern](crate::replica::ReplicaSpec), while default event handlers that log
//! out events can be enabled in the [configuration](crate::replica::Configuration).
//!
//! ## Timing
//!
//! Events are always emitted **after** the corresponding occurence is "completed". So for example,
//! the [decide event](DecideEvent) is only emitted after the confirmed instance has been persisted
//! into the backing log store.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::messages::ChangeOp;
use crate::types::basic::{GroupName, InstanceId, ProposalNo, ViewVersion};
use crate::types::endpoint::{Endpoint, NodeId};
use crate::types::instance::Proposal;

/// Enumerates all events defined for MultiPaxos-rs.
pub enum Event {
    // Events on the proposing path.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Accept(AcceptEvent),

    // Events on the learning path.
    Decide(DecideEvent),
    Apply(ApplyEvent),
    Learn(LearnEvent),

    // Master events.
    StartElection(StartElectionEvent),
    ChangeMaster(ChangeMasterEvent),
    ReceiveHeartbeat(ReceiveHeartbeatEvent),
    ChangeMember(ChangeMemberEvent),
}

impl Event {
    /// Publishes a given instance of the [Event](Event) enum on the event publisher channel (if
    /// the channel is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A negotiation was started for a client or internal proposal addressed to `group`.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
    pub group: GroupName,
}

/// A Phase 1 broadcast went out for the given instance and proposal number.
pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
}

/// A Phase 2 broadcast went out for the given instance and proposal number.
pub struct AcceptEvent {
    pub timestamp: SystemTime,
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
}

/// An instance was confirmed and durably recorded on this node. `origin` is the node whose
/// confirm was recorded; it equals the local node id when this node drove the decision.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub origin: NodeId,
    pub instance_id: InstanceId,
    pub values: Vec<Proposal>,
}

/// A decided instance was applied to the registered state machines, in log order.
pub struct ApplyEvent {
    pub timestamp: SystemTime,
    pub instance_id: InstanceId,
}

/// The Learner started recovering a log gap by re-driving consensus for the given instance.
pub struct LearnEvent {
    pub timestamp: SystemTime,
    pub instance_id: InstanceId,
}

/// The election timer fired on this node and an election round began.
pub struct StartElectionEvent {
    pub timestamp: SystemTime,
}

/// A master election was decided. Every node that applies the decision emits this event.
pub struct ChangeMasterEvent {
    pub timestamp: SystemTime,
    pub master: NodeId,
    pub version: ViewVersion,
}

/// A heartbeat was received from `origin` and accepted or rejected against the local view.
pub struct ReceiveHeartbeatEvent {
    pub timestamp: SystemTime,
    pub origin: NodeId,
    pub accepted: bool,
}

/// A single-node membership change was decided and applied to the view.
pub struct ChangeMemberEvent {
    pub timestamp: SystemTime,
    pub op: ChangeOp,
    pub change_target: Endpoint,
    pub version: ViewVersion,
}
