//! Learner-level scenarios driven by a scripted peer.
//!
//! Each test runs one real replica next to a "probe": a bare [`NetworkStub`] the test drives by
//! hand. The probe counts as a member, so the replica needs its answers for any quorum of two,
//! which lets tests stage acceptor state and control exactly when recovery can make progress.

mod common;

use std::time::{Duration, Instant};

use borsh::BorshSerialize;
use log::LevelFilter;
use multipaxos_rs::app::APP_GROUP;
use multipaxos_rs::messages::{
    AcceptRes, ConfirmReq, Message, PaxosRequest, PrepareRes,
};
use multipaxos_rs::networking::Network;
use multipaxos_rs::types::basic::{GroupName, InstanceId, ProposalNo};
use multipaxos_rs::types::endpoint::NodeId;
use multipaxos_rs::types::instance::{InstanceState, Proposal};

use common::logging::setup_logger;
use common::network::{mock_network, NetworkStub};
use common::node::Node;
use common::number_app::NumberAppTransaction;
use common::{await_condition, make_endpoints};

fn confirm_msg(instance_id: u64, transaction: NumberAppTransaction) -> Message {
    ConfirmReq {
        node_id: NodeId::new("probe"),
        instance_id: InstanceId::new(instance_id),
        values: vec![Proposal::new(
            GroupName::new(APP_GROUP),
            transaction.try_to_vec().unwrap(),
        )],
    }
    .into()
}

/// Answer the replica's Prepare and Accept requests like an acceptor that has promised nothing
/// and accepted nothing, until `until` returns true or the deadline passes.
fn grant_everything(probe: &mut NetworkStub, deadline: Instant, until: impl Fn() -> bool) {
    while Instant::now() < deadline && !until() {
        match probe.recv() {
            Some((origin, Message::PaxosRequest(PaxosRequest::Prepare(req)))) => {
                probe.send(
                    &origin,
                    PrepareRes {
                        instance_id: req.instance_id,
                        proposal_no: req.proposal_no,
                        ok: true,
                        state: InstanceState::Prepared,
                        max_accepted_proposal_no: ProposalNo::new(0),
                        accepted_value: Vec::new(),
                        cur_proposal_no: req.proposal_no,
                    }
                    .into(),
                );
            }
            Some((origin, Message::PaxosRequest(PaxosRequest::Accept(req)))) => {
                probe.send(
                    &origin,
                    AcceptRes {
                        instance_id: req.instance_id,
                        proposal_no: req.proposal_no,
                        ok: true,
                        cur_proposal_no: req.proposal_no,
                    }
                    .into(),
                );
            }
            Some(_) => (),
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
}

#[test]
fn out_of_order_confirms_apply_in_order() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "probe"]);
    let mut networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let mut probe = networks.remove(1);
    let node = Node::new(endpoints[0].clone(), endpoints.clone(), networks.remove(0));

    // Confirms arrive 3, 1, 2. The probe never answers the recovery rounds that the early
    // arrival of instance 3 triggers, so the gap can only be filled by the real confirms.
    probe.send(node.id(), confirm_msg(3, NumberAppTransaction::Add(3)));
    probe.send(node.id(), confirm_msg(1, NumberAppTransaction::Add(1)));
    probe.send(node.id(), confirm_msg(2, NumberAppTransaction::Add(2)));

    await_condition(
        Duration::from_secs(20),
        "instances apply as 1, 2, 3",
        || node.history() == vec![1, 3, 6],
    );
    assert_eq!(node.max_applied_instance_id(), InstanceId::new(3));
}

#[test]
fn duplicate_confirm_applies_once() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "probe"]);
    let mut networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let mut probe = networks.remove(1);
    let node = Node::new(endpoints[0].clone(), endpoints.clone(), networks.remove(0));

    probe.send(node.id(), confirm_msg(1, NumberAppTransaction::Increment));
    probe.send(node.id(), confirm_msg(1, NumberAppTransaction::Increment));

    await_condition(Duration::from_secs(10), "the confirm applies", || {
        node.number() == 1
    });

    // Give the duplicate time to surface if it were going to.
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(node.history(), vec![1]);
    assert_eq!(node.max_applied_instance_id(), InstanceId::new(1));
}

#[test]
fn recovery_preserves_accepted_value_over_noop() {
    setup_logger(LevelFilter::Debug);

    let endpoints = make_endpoints(&["n0", "probe"]);
    let mut networks = mock_network(endpoints.iter().map(|endpoint| endpoint.id().clone()));
    let mut probe = networks.remove(1);
    let node = Node::new(endpoints[0].clone(), endpoints.clone(), networks.remove(0));

    // Stage a half-finished round: the replica's acceptor accepts Add(7) for instance 1, but no
    // confirm ever arrives for it. This is the state a crashed leader leaves behind mid-Accept.
    probe.send(
        node.id(),
        multipaxos_rs::messages::PrepareReq {
            instance_id: InstanceId::new(1),
            proposal_no: ProposalNo::new(5),
        }
        .into(),
    );
    probe.send(
        node.id(),
        multipaxos_rs::messages::AcceptReq {
            instance_id: InstanceId::new(1),
            proposal_no: ProposalNo::new(5),
            values: vec![Proposal::new(
                GroupName::new(APP_GROUP),
                NumberAppTransaction::Add(7).try_to_vec().unwrap(),
            )],
        }
        .into(),
    );

    // Confirm instance 2. Applying it requires instance 1, whose recovery must re-propose the
    // accepted Add(7), not the noop placeholder.
    probe.send(node.id(), confirm_msg(2, NumberAppTransaction::Increment));

    grant_everything(&mut probe, Instant::now() + Duration::from_secs(20), || {
        node.number() == 8
    });

    assert_eq!(node.history(), vec![7, 8]);
    // Elections decide instances of their own once the probe grants them, so the pointer is at
    // least 2 rather than exactly 2.
    assert!(node.max_applied_instance_id() >= InstanceId::new(2));
}
