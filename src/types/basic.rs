/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" newtypes that are sent around and inspected but have no active behavior: instance ids,
//! proposal numbers, membership versions, and group names. The API for using these types is defined
//! in this module; types specific to a single subsystem live next to that subsystem.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Display, Formatter},
    ops::{Add, AddAssign, Sub},
};

/// Position of one slot in the replicated log. Each instance is decided at most one value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    /// The id before the first allocated instance. No value is ever decided here.
    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for InstanceId {
    type Output = InstanceId;

    fn add(self, rhs: u64) -> Self::Output {
        InstanceId(self.0.add(rhs))
    }
}

impl AddAssign<u64> for InstanceId {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<u64> for InstanceId {
    type Output = InstanceId;

    fn sub(self, rhs: u64) -> Self::Output {
        InstanceId(self.0.sub(rhs))
    }
}

/// Globally-monotonic 64-bit tag that orders proposers contending for a single instance.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ProposalNo(u64);

impl ProposalNo {
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    /// The number below every number a proposer may select.
    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ProposalNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for ProposalNo {
    type Output = ProposalNo;

    fn add(self, rhs: u64) -> Self::Output {
        ProposalNo(self.0.add(rhs))
    }
}

/// Version of the membership view. Strictly monotonic; makes stale heartbeats self-invalidating.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewVersion(u32);

impl ViewVersion {
    pub fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ViewVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u32> for ViewVersion {
    type Output = ViewVersion;

    fn add(self, rhs: u32) -> Self::Output {
        ViewVersion(self.0.add(rhs))
    }
}

/// Logical group a proposal is addressed to. Decided values are routed to the state machine
/// registered under their group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct GroupName(String);

impl GroupName {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
