/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! MultiPaxos-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [Decide](crate::events::DecideEvent) is printed:
//!
//! ```text
//! Decide, 1701329264, node-2, 17, 1, Id5u7f6
//! ```
//!
//! In the snippet:
//! - The third value is the id of the node whose confirm was recorded.
//! - The fourth value is the instance id, the fifth the number of proposals decided in it.
//! - The sixth value is the first seven characters of the Base64 encoding of the first decided
//!   proposal's payload (or `-` when the instance decided nothing but a noop).

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;
use crate::types::instance::Proposal;

// Names of each event in PascalCase for printing:
pub const PROPOSE: &str = "Propose";
pub const PREPARE: &str = "Prepare";
pub const ACCEPT: &str = "Accept";

pub const DECIDE: &str = "Decide";
pub const APPLY: &str = "Apply";
pub const LEARN: &str = "Learn";

pub const START_ELECTION: &str = "StartElection";
pub const CHANGE_MASTER: &str = "ChangeMaster";
pub const RECEIVE_HEARTBEAT: &str = "ReceiveHeartbeat";
pub const CHANGE_MEMBER: &str = "ChangeMember";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.instance_id,
                propose_event.proposal_no,
                propose_event.group
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.instance_id,
                prepare_event.proposal_no
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcceptEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_event: &AcceptEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ACCEPT,
                secs_since_unix_epoch(accept_event.timestamp),
                accept_event.instance_id,
                accept_event.proposal_no
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.origin,
                decide_event.instance_id,
                decide_event.values.len(),
                value_preview(&decide_event.values)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_event: &ApplyEvent| {
            log::info!(
                "{}, {}, {}",
                APPLY,
                secs_since_unix_epoch(apply_event.timestamp),
                apply_event.instance_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for LearnEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |learn_event: &LearnEvent| {
            log::info!(
                "{}, {}, {}",
                LEARN,
                secs_since_unix_epoch(learn_event.timestamp),
                learn_event.instance_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartElectionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_election_event: &StartElectionEvent| {
            log::info!(
                "{}, {}",
                START_ELECTION,
                secs_since_unix_epoch(start_election_event.timestamp)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ChangeMasterEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |change_master_event: &ChangeMasterEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CHANGE_MASTER,
                secs_since_unix_epoch(change_master_event.timestamp),
                change_master_event.master,
                change_master_event.version
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveHeartbeatEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_heartbeat_event: &ReceiveHeartbeatEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                RECEIVE_HEARTBEAT,
                secs_since_unix_epoch(receive_heartbeat_event.timestamp),
                receive_heartbeat_event.origin,
                receive_heartbeat_event.accepted
            )
        };
        Box::new(logger)
    }
}

impl Logger for ChangeMemberEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |change_member_event: &ChangeMemberEvent| {
            log::info!(
                "{}, {}, {:?}, {}, {}",
                CHANGE_MEMBER,
                secs_since_unix_epoch(change_member_event.timestamp),
                change_member_event.op,
                change_member_event.change_target,
                change_member_event.version
            )
        };
        Box::new(logger)
    }
}

/// Get a more readable representation of the first decided payload by base64-encoding it and
/// taking the first 7 characters.
fn value_preview(values: &[Proposal]) -> String {
    match values.iter().find(|proposal| !proposal.is_noop()) {
        Some(proposal) => {
            let encoded = STANDARD_NO_PAD.encode(&proposal.data);
            if encoded.len() > 7 {
                encoded[0..7].to_string()
            } else {
                encoded
            }
        }
        None => String::from("-"),
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
