/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas.
//!
//! Every exchange of the protocol is either a [request](PaxosRequest), answered by the request
//! server of the receiving node, or a [response](PaxosResponse), routed back to the role that is
//! waiting on it. Responses echo the `(instance_id, proposal_no)` of the round they answer so that
//! collectors can discard stale ones.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{InstanceId, ProposalNo, ViewVersion};
use crate::types::endpoint::{Endpoint, NodeId};
use crate::types::instance::{InstanceState, Proposal};

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    PaxosRequest(PaxosRequest),
    PaxosResponse(PaxosResponse),
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum PaxosRequest {
    Prepare(PrepareReq),
    Accept(AcceptReq),
    Confirm(ConfirmReq),
    Ping(Ping),
    ChangeMember(ChangeMemberReq),
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum PaxosResponse {
    Prepare(PrepareRes),
    Accept(AcceptRes),
    ConfirmAck(ConfirmAck),
    Pong(Pong),
}

/// Phase 1 of a round: ask every acceptor to promise away lower-numbered proposals.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PrepareReq {
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
}

/// An acceptor's answer to a [`PrepareReq`].
///
/// On a grant, `max_accepted_proposal_no`/`accepted_value` report what this acceptor has already
/// accepted for the instance (empty if nothing), and `state` lets the proposer short-circuit when
/// the instance is already confirmed here. On a refusal, `cur_proposal_no` carries the strictly
/// higher number this acceptor has promised.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PrepareRes {
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
    pub ok: bool,
    pub state: InstanceState,
    pub max_accepted_proposal_no: ProposalNo,
    pub accepted_value: Vec<Proposal>,
    pub cur_proposal_no: ProposalNo,
}

/// Phase 2 of a round: ask every acceptor to accept `values` for the instance.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct AcceptReq {
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
    pub values: Vec<Proposal>,
}

/// An acceptor's answer to an [`AcceptReq`]. On refusal, `cur_proposal_no` is the highest proposal
/// number this acceptor has seen, so the proposer can restart Phase 1 above it.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct AcceptRes {
    pub instance_id: InstanceId,
    pub proposal_no: ProposalNo,
    pub ok: bool,
    pub cur_proposal_no: ProposalNo,
}

/// Phase 3 of a round: tell every learner the decided value. Fire-and-forget.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ConfirmReq {
    pub node_id: NodeId,
    pub instance_id: InstanceId,
    pub values: Vec<Proposal>,
}

/// Acknowledgement of a [`ConfirmReq`]. Logged by the sender; never retried.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ConfirmAck {
    pub instance_id: InstanceId,
}

/// Master liveness beacon, broadcast every heartbeat interval.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Ping {
    pub node_id: NodeId,
    pub proposal_no: ProposalNo,
    pub member_version: ViewVersion,
}

/// A follower's answer to a [`Ping`].
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Pong {
    pub ok: bool,
}

/// Kind of single-node membership change requested through the master.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ChangeOp {
    Add,
    Remove,
}

/// Ask the receiving node to drive a membership change through consensus.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ChangeMemberReq {
    pub op: ChangeOp,
    pub change_target: Endpoint,
}

impl From<PrepareReq> for Message {
    fn from(value: PrepareReq) -> Self {
        Message::PaxosRequest(PaxosRequest::Prepare(value))
    }
}

impl From<AcceptReq> for Message {
    fn from(value: AcceptReq) -> Self {
        Message::PaxosRequest(PaxosRequest::Accept(value))
    }
}

impl From<ConfirmReq> for Message {
    fn from(value: ConfirmReq) -> Self {
        Message::PaxosRequest(PaxosRequest::Confirm(value))
    }
}

impl From<Ping> for Message {
    fn from(value: Ping) -> Self {
        Message::PaxosRequest(PaxosRequest::Ping(value))
    }
}

impl From<ChangeMemberReq> for Message {
    fn from(value: ChangeMemberReq) -> Self {
        Message::PaxosRequest(PaxosRequest::ChangeMember(value))
    }
}

impl From<PrepareRes> for Message {
    fn from(value: PrepareRes) -> Self {
        Message::PaxosResponse(PaxosResponse::Prepare(value))
    }
}

impl From<AcceptRes> for Message {
    fn from(value: AcceptRes) -> Self {
        Message::PaxosResponse(PaxosResponse::Accept(value))
    }
}

impl From<ConfirmAck> for Message {
    fn from(value: ConfirmAck) -> Self {
        Message::PaxosResponse(PaxosResponse::ConfirmAck(value))
    }
}

impl From<Pong> for Message {
    fn from(value: Pong) -> Self {
        Message::PaxosResponse(PaxosResponse::Pong(value))
    }
}
