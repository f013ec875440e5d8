/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state machine behind the `"master"` group: elections and single-node membership changes
//! ride through the same consensus pipeline as user proposals, and land here when they apply.
//!
//! Because every node applies the same operations in the same log order, every node's membership
//! view converges to the same members, master, and version without any further coordination.

use borsh::{BorshDeserialize, BorshSerialize};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::SystemTime;

use crate::app::{App, ApplyError};
use crate::events::{ChangeMasterEvent, ChangeMemberEvent, Event};
use crate::messages::ChangeOp;
use crate::networking::{MemberUpdateHandle, Network};
use crate::types::basic::{InstanceId, ViewVersion};
use crate::types::endpoint::{Endpoint, NodeId};
use crate::types::member_view::MemberViewSnapshot;

use super::PaxosNode;

/// Group under which the [`MasterSm`] is registered on every node.
pub const MASTER_GROUP: &str = "master";

/// Operations decided through the `"master"` group.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub(crate) enum MasterOp {
    /// The proposing node asks to become master.
    Election { node_id: NodeId },
    /// Add a node to the membership view.
    AddMember { endpoint: Endpoint },
    /// Remove a node from the membership view.
    RemoveMember { endpoint: Endpoint },
}

pub(crate) struct MasterSm<N: Network> {
    node: Arc<PaxosNode>,
    update_handle: MemberUpdateHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> MasterSm<N> {
    pub(crate) fn new(
        node: Arc<PaxosNode>,
        update_handle: MemberUpdateHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            node,
            update_handle,
            event_publisher,
        }
    }
}

impl<N: Network> App for MasterSm<N> {
    fn apply(&mut self, instance_id: InstanceId, command: &[u8]) -> Result<Vec<u8>, ApplyError> {
        let op = MasterOp::deserialize(&mut &*command).map_err(|_| ApplyError::MalformedCommand)?;
        let view = self.node.member_view();

        match op {
            MasterOp::Election { node_id } => {
                // change_master bumps the version and notifies the Master role, which switches
                // its timers in on_change_master.
                if view.change_master(&node_id) {
                    Event::ChangeMaster(ChangeMasterEvent {
                        timestamp: SystemTime::now(),
                        master: node_id,
                        version: view.version(),
                    })
                    .publish(&self.event_publisher);
                } else {
                    log::warn!(
                        "election decided for node-{} which is not a member, instance: {}",
                        node_id,
                        instance_id
                    );
                }
            }
            MasterOp::AddMember { endpoint } => {
                view.write_on(endpoint.clone());
                self.update_handle
                    .update_members(view.create_ref().endpoints());
                Event::ChangeMember(ChangeMemberEvent {
                    timestamp: SystemTime::now(),
                    op: ChangeOp::Add,
                    change_target: endpoint,
                    version: view.version(),
                })
                .publish(&self.event_publisher);
            }
            MasterOp::RemoveMember { endpoint } => {
                view.write_off(endpoint.id());
                self.update_handle
                    .update_members(view.create_ref().endpoints());
                Event::ChangeMember(ChangeMemberEvent {
                    timestamp: SystemTime::now(),
                    op: ChangeOp::Remove,
                    change_target: endpoint,
                    version: view.version(),
                })
                .publish(&self.event_publisher);
            }
        }

        Ok(Vec::new())
    }

    fn make_image(&self) -> Vec<u8> {
        let snapshot = self.node.member_view().create_ref();
        let image = MasterImage {
            members: snapshot.endpoints(),
            master: snapshot.master().map(|endpoint| endpoint.id().clone()),
            version: snapshot.version(),
        };
        image.try_to_vec().expect("master images are serializable")
    }

    fn load_image(&mut self, image: &[u8]) {
        let image =
            MasterImage::deserialize(&mut &*image).expect("stored master image is well-formed");
        self.node.member_view().load_snap(MemberViewSnapshot::restore(
            image.members,
            image.master,
            image.version,
        ));
    }
}

/// Serialized form of the membership view, stored as the `"master"` group's image.
#[derive(BorshSerialize, BorshDeserialize)]
struct MasterImage {
    members: Vec<Endpoint>,
    master: Option<NodeId>,
    version: ViewVersion,
}
