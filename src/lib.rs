/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! MultiPaxos-rs is a Rust Programming Language implementation of the Multi-Paxos consensus
//! protocol with a single elected master. It offers:
//! 1. A replicated log whose decided values are applied to a state machine in strictly
//!    increasing instance order on every node,
//! 2. A small API ([`app::App`]) for plugging in arbitrary state machine-based applications,
//! 3. Pluggable peer-to-peer [networking](crate::networking) and [storage](crate::state),
//! 4. Master election with heartbeat liveness, and pull-based recovery that re-drives consensus
//!    to collapse log gaps.

pub mod app;

pub mod event_bus;

pub mod events;

pub mod messages;

pub mod networking;

pub mod paxos;

pub mod replica;

pub mod state;

pub mod types;

pub(crate) mod logging;

pub(crate) mod server;

pub(crate) mod timer;

// Re-exports
pub use app::App;
pub use replica::{Configuration, Replica, ReplicaSpec};
