/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](App) for the user state machine that decided values are applied to.
//!
//! Implementors are expected to be *deterministic*: applying the same sequence of commands to the
//! same starting state must produce the same state on every node. The engine guarantees in
//! exchange that `apply` is invoked with strictly increasing instance ids with no gaps and no
//! repeats, from a single thread.
//!
//! Implementors must also be idempotent across retries of the same command *value*: consensus
//! guarantees at-most-once apply per instance, but a client whose proposal ended in an
//! inconclusive round may resubmit the same command, which would then be decided in a fresh
//! instance.

use crate::types::basic::InstanceId;

/// Group under which the user [`App`] is registered. Proposals submitted through
/// [`Replica::propose`](crate::replica::Replica::propose) are addressed to this group.
pub const APP_GROUP: &str = "app";

pub trait App: Send + 'static {
    /// Apply one decided command to the state machine and return the result that is handed to the
    /// proposing client's [`apply_done`](crate::paxos::proposer::ProposeDone::apply_done).
    ///
    /// Errors are logged and swallowed by the Learner: the instance stays applied, and the chain
    /// of subsequent instances is not interrupted.
    fn apply(&mut self, instance_id: InstanceId, command: &[u8]) -> Result<Vec<u8>, ApplyError>;

    /// Serialize the current state into an opaque image. Called periodically and on shutdown.
    fn make_image(&self) -> Vec<u8>;

    /// Replace the current state with a previously made image. Called on boot, before any
    /// `apply`.
    fn load_image(&mut self, image: &[u8]);
}

/// Circumstances in which an [`App`] can fail to apply a decided command.
#[derive(Debug)]
pub enum ApplyError {
    /// The command bytes could not be decoded by the state machine.
    MalformedCommand,
    /// The command was decoded but rejected by application-level rules.
    Rejected(String),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::MalformedCommand => write!(f, "command bytes could not be decoded"),
            ApplyError::Rejected(reason) => write!(f, "command rejected: {}", reason),
        }
    }
}
