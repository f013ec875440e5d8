/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Peer identity types. Every peer is reachable by its [`NodeId`]; an [`Endpoint`] binds that id to
//! a network address and is the unit the membership view stores.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

/// Unique name of a peer. Assigned by the operator and stable for the lifetime of the node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Immutable identity of a peer: its [`NodeId`] plus the address the networking provider should
/// dial to reach it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Endpoint {
    id: NodeId,
    ip: String,
    port: u16,
}

impl Endpoint {
    pub fn new(id: NodeId, ip: &str, port: u16) -> Self {
        Self {
            id,
            ip: ip.to_string(),
            port,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.ip, self.port)
    }
}
