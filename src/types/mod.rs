/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types common across the subsystems of MultiPaxos-rs.
//!
//! Types specific to a single component live in that component's module; for example the master
//! operations sit in [`crate::paxos::master_sm`].

pub mod basic;

pub mod endpoint;

pub mod instance;

pub mod member_view;

pub mod quorum;
