/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-slot record of the replicated log ([`Instance`]) and the opaque payload a slot is
//! decided on ([`Proposal`]).
//!
//! Instance states advance monotonically: `Prepared` to `Accepted` to `Confirmed`. Once an
//! instance is `Confirmed` its granted value and proposal number never change again, and its
//! `applied` flag transitions false to true exactly once.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{GroupName, InstanceId, ProposalNo};

/// Group name reserved for the gap-filling [noop proposal](Proposal::noop). No state machine is
/// ever registered under it; the Learner skips noop values when applying.
pub const NOOP_GROUP: &str = "noop";

/// An opaque, serializable payload carrying a logical group name and user bytes.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Proposal {
    pub group: GroupName,
    pub data: Vec<u8>,
}

impl Proposal {
    pub fn new(group: GroupName, data: Vec<u8>) -> Self {
        Self { group, data }
    }

    /// The distinguished proposal used to seal an abandoned instance during recovery so that
    /// subsequent instances may apply.
    pub fn noop() -> Self {
        Self {
            group: GroupName::new(NOOP_GROUP),
            data: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.group.str() == NOOP_GROUP
    }
}

/// Stage an instance has reached on this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub enum InstanceState {
    Prepared,
    Accepted,
    Confirmed,
}

/// One slot of the replicated log as persisted by the [log store](crate::state::kv_store::LogStore).
///
/// Created on the first Prepare, Accept, or Confirm seen for its id.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Instance {
    id: InstanceId,
    state: InstanceState,
    granted_proposal_no: ProposalNo,
    granted_value: Vec<Proposal>,
    applied: bool,
}

impl Instance {
    /// Create a fresh record in `Prepared` state with no accepted value.
    pub fn prepared(id: InstanceId) -> Self {
        Self {
            id,
            state: InstanceState::Prepared,
            granted_proposal_no: ProposalNo::init(),
            granted_value: Vec::new(),
            applied: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn granted_proposal_no(&self) -> ProposalNo {
        self.granted_proposal_no
    }

    pub fn granted_value(&self) -> &Vec<Proposal> {
        &self.granted_value
    }

    pub fn applied(&self) -> bool {
        self.applied
    }

    /// Record an accepted value. Ignored if the instance is already `Confirmed`: a confirmed
    /// value is immutable.
    pub fn accept(&mut self, proposal_no: ProposalNo, value: Vec<Proposal>) {
        if self.state == InstanceState::Confirmed {
            return;
        }
        self.state = InstanceState::Accepted;
        self.granted_proposal_no = proposal_no;
        self.granted_value = value;
    }

    /// Seal the instance with its decided value. Idempotent: confirming a confirmed instance
    /// with the same value changes nothing.
    pub fn confirm(&mut self, value: Vec<Proposal>) {
        if self.state == InstanceState::Confirmed {
            return;
        }
        self.state = InstanceState::Confirmed;
        self.granted_value = value;
    }

    /// Flip the applied flag. Returns false if the instance was already applied, so callers can
    /// treat the transition as a compare-and-set.
    pub fn set_applied(&mut self) -> bool {
        if self.applied {
            return false;
        }
        self.applied = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_value_is_immutable() {
        let mut instance = Instance::prepared(InstanceId::new(7));
        instance.accept(ProposalNo::new(3), vec![Proposal::noop()]);
        instance.confirm(vec![Proposal::new(GroupName::new("app"), vec![1])]);

        instance.accept(ProposalNo::new(9), vec![Proposal::noop()]);
        instance.confirm(vec![Proposal::noop()]);

        assert_eq!(instance.state(), InstanceState::Confirmed);
        assert_eq!(
            instance.granted_value(),
            &vec![Proposal::new(GroupName::new("app"), vec![1])]
        );
    }

    #[test]
    fn applied_flips_exactly_once() {
        let mut instance = Instance::prepared(InstanceId::new(1));
        instance.confirm(vec![Proposal::noop()]);
        assert!(instance.set_applied());
        assert!(!instance.set_applied());
    }
}
