/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The acceptor side of the two-phase protocol: grant rules for Prepare and Accept against the
//! local log and the node-wide promise.
//!
//! The promise is the node's global proposal number: granting a Prepare raises it, and anything
//! at or below it is refused. Equal numbers are refused at both phases, so two proposers that
//! picked the same number can never both pass through one acceptor.

use std::sync::Arc;

use crate::messages::{AcceptReq, AcceptRes, PrepareReq, PrepareRes};
use crate::state::kv_store::LogStore;
use crate::state::log::Log;
use crate::types::instance::{Instance, InstanceState};

use super::PaxosNode;

pub struct Acceptor<K: LogStore> {
    node: Arc<PaxosNode>,
    log: Arc<Log<K>>,
}

impl<K: LogStore> Acceptor<K> {
    pub(crate) fn new(node: Arc<PaxosNode>, log: Arc<Log<K>>) -> Self {
        Self { node, log }
    }

    /// Answer a Phase 1 request.
    ///
    /// Grants iff the proposal number is strictly greater than every number this node has seen,
    /// creating the instance record on first contact. The response always reports the instance's
    /// state and accepted value (when a record exists) so that a refused proposer can still
    /// short-circuit on an already-confirmed instance.
    pub(crate) fn handle_prepare(&self, req: PrepareReq) -> PrepareRes {
        let mut log = self.log.write();
        let instance = log
            .instance(req.instance_id)
            .expect("log store is unusable");

        let previous = self.node.observe_proposal_no(req.proposal_no);
        let ok = req.proposal_no > previous;

        let instance = match instance {
            Some(instance) => instance,
            None => {
                let fresh = Instance::prepared(req.instance_id);
                if ok {
                    log.set_instance(&fresh);
                }
                fresh
            }
        };

        log::debug!(
            "prepare instance: {}, proposalNo: {}, granted: {}",
            req.instance_id,
            req.proposal_no,
            ok
        );

        PrepareRes {
            instance_id: req.instance_id,
            proposal_no: req.proposal_no,
            ok,
            state: instance.state(),
            max_accepted_proposal_no: instance.granted_proposal_no(),
            accepted_value: instance.granted_value().clone(),
            cur_proposal_no: self.node.cur_proposal_no(),
        }
    }

    /// Answer a Phase 2 request.
    ///
    /// Grants iff the proposal number is not below the node's promise, strictly above the
    /// instance's accepted number, and the instance is not already confirmed. On a grant the
    /// value is durably recorded as accepted.
    pub(crate) fn handle_accept(&self, req: AcceptReq) -> AcceptRes {
        let mut log = self.log.write();
        let mut instance = log
            .instance(req.instance_id)
            .expect("log store is unusable")
            .unwrap_or_else(|| Instance::prepared(req.instance_id));

        let promise = self.node.cur_proposal_no();
        let ok = req.proposal_no >= promise
            && req.proposal_no > instance.granted_proposal_no()
            && instance.state() != InstanceState::Confirmed;

        if ok {
            instance.accept(req.proposal_no, req.values);
            log.set_instance(&instance);
        }

        log::debug!(
            "accept instance: {}, proposalNo: {}, granted: {}",
            req.instance_id,
            req.proposal_no,
            ok
        );

        AcceptRes {
            instance_id: req.instance_id,
            proposal_no: req.proposal_no,
            ok,
            cur_proposal_no: promise.max(instance.granted_proposal_no()),
        }
    }
}
