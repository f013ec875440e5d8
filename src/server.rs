/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The request server thread: answers every inbound [`PaxosRequest`] against the local roles.
//!
//! Prepare and Accept go to the Acceptor, Confirm to the Learner, and Ping to the Master, each
//! answered inline. Member changes are the exception: they drive a whole consensus round, and
//! that round needs this very thread to answer the node's own Prepare and Accept, so they are
//! dispatched onto the background pool instead of being handled inline.

use std::sync::mpsc::Receiver;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use threadpool::ThreadPool;

use crate::messages::{ConfirmAck, PaxosRequest, Pong};
use crate::networking::{Network, SenderHandle};
use crate::paxos::Roles;
use crate::state::kv_store::LogStore;
use crate::types::endpoint::NodeId;

pub(crate) fn start_server<N: Network, K: LogStore>(
    roles: Weak<Roles<N, K>>,
    requests: Receiver<(NodeId, PaxosRequest)>,
    mut sender: SenderHandle<N>,
    pool: ThreadPool,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("request-server".to_string())
        .spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(std::sync::mpsc::TryRecvError::Empty) => (),
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    panic!("request server thread disconnected from main thread")
                }
            }

            let (origin, request) = match requests.try_recv() {
                Ok(request) => request,
                Err(std::sync::mpsc::TryRecvError::Empty) => {
                    thread::yield_now();
                    continue;
                }
                // Safety: the poller thread (the sender side of this channel) shuts down after
                // the server thread, so we will never be disconnected at this point.
                Err(std::sync::mpsc::TryRecvError::Disconnected) => return,
            };

            let roles = match roles.upgrade() {
                Some(roles) => roles,
                None => return,
            };

            match request {
                PaxosRequest::Prepare(req) => {
                    let res = roles.acceptor().handle_prepare(req);
                    sender.send(&origin, res);
                }
                PaxosRequest::Accept(req) => {
                    let res = roles.acceptor().handle_accept(req);
                    sender.send(&origin, res);
                }
                PaxosRequest::Confirm(req) => {
                    let instance_id = req.instance_id;
                    roles.learner().handle_confirm_request(req);
                    sender.send(&origin, ConfirmAck { instance_id });
                }
                PaxosRequest::Ping(ping) => {
                    let is_self = origin == ping.node_id;
                    let ok = roles.master().on_receive_heartbeat(&ping, is_self);
                    sender.send(&origin, Pong { ok });
                }
                PaxosRequest::ChangeMember(req) => {
                    let roles = std::sync::Arc::downgrade(&roles);
                    pool.execute(move || {
                        if let Some(roles) = roles.upgrade() {
                            roles.master().change_member(req);
                        }
                    });
                }
            }
        })
        .expect("could not spawn request server thread")
}
