/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the internal
//! types and functions that replicas use to interact with the network.
//!
//! MultiPaxos-rs has modular peer-to-peer networking, with each peer reachable by its
//! [`NodeId`]. Networking providers interact with the replica's threads through implementations of
//! the [`Network`] trait: a best-effort, non-blocking bus with no ordering or delivery guarantees.
//! Deadlines are enforced on the waiting side: the response stubs defined here receive from a
//! channel until an `Instant` deadline, and peers that have not answered by then are counted as
//! refusals by the caller.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::messages::*;
use crate::types::endpoint::{Endpoint, NodeId};

pub trait Network: Clone + Send + 'static {
    /// Informs the network provider of the member set on wake-up.
    fn init_members(&mut self, members: Vec<Endpoint>);

    /// Informs the networking provider of a committed change to the member set.
    fn update_members(&mut self, members: Vec<Endpoint>);

    /// Send a message to the specified peer without blocking. Delivery is best-effort.
    fn send(&mut self, peer: &NodeId, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(NodeId, Message)>;
}

/// A phase answer awaited by the Proposer: either Phase 1 or Phase 2.
pub(crate) enum PhaseResponse {
    Prepare(PrepareRes),
    Accept(AcceptRes),
}

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into
/// receivers for:
/// 1. Requests (processed by the [request server](crate::server) thread),
/// 2. Phase responses (collected by the [Proposer](crate::paxos::proposer::Proposer)), and
/// 3. Pongs (collected by the [Master](crate::paxos::master::Master)'s heartbeat).
///
/// Confirm acks terminate here with a trace log; the Learner's pull-based recovery is the
/// authority for holes, so acks are never acted on.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(NodeId, PaxosRequest)>,
    Receiver<(NodeId, PhaseResponse)>,
    Receiver<(NodeId, Pong)>,
) {
    let (to_request_receiver, request_receiver) = mpsc::channel();
    let (to_phase_receiver, phase_receiver) = mpsc::channel();
    let (to_pong_receiver, pong_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::PaxosRequest(request) => {
                    let _ = to_request_receiver.send((origin, request));
                }
                Message::PaxosResponse(response) => match response {
                    PaxosResponse::Prepare(res) => {
                        let _ = to_phase_receiver.send((origin, PhaseResponse::Prepare(res)));
                    }
                    PaxosResponse::Accept(res) => {
                        let _ = to_phase_receiver.send((origin, PhaseResponse::Accept(res)));
                    }
                    PaxosResponse::Pong(pong) => {
                        let _ = to_pong_receiver.send((origin, pong));
                    }
                    PaxosResponse::ConfirmAck(ack) => {
                        log::trace!("node-{} acked confirm, instance: {}", origin, ack.instance_id)
                    }
                },
            }
        } else {
            thread::yield_now()
        }
    });
    (poller_thread, request_receiver, phase_receiver, pong_receiver)
}

/// Handle for sending messages to the [`Network`]. Can be used to send messages of message types
/// that implement the [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: &NodeId, msg: S) {
        self.network.send(peer, msg.into())
    }
}

/// Handle for informing the network provider about committed member set changes.
#[derive(Clone)]
pub(crate) struct MemberUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> MemberUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_members(&mut self, members: Vec<Endpoint>) {
        self.network.update_members(members)
    }
}

#[derive(Debug)]
pub(crate) enum ResponseReceiveError {
    Timeout,
    Disconnected,
}

/// A receiving end for phase responses, consumed by the Proposer while it holds the round lock.
pub(crate) struct PhaseResponseStub {
    responses: Receiver<(NodeId, PhaseResponse)>,
}

impl PhaseResponseStub {
    pub(crate) fn new(responses: Receiver<(NodeId, PhaseResponse)>) -> PhaseResponseStub {
        PhaseResponseStub { responses }
    }

    /// Receive the next phase response, waiting until `deadline`.
    pub(crate) fn recv_response(
        &self,
        deadline: Instant,
    ) -> Result<(NodeId, PhaseResponse), ResponseReceiveError> {
        while Instant::now() < deadline {
            match self.responses.recv_timeout(deadline - Instant::now()) {
                Ok(response) => return Ok(response),
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ResponseReceiveError::Disconnected)
                }
            }
        }

        Err(ResponseReceiveError::Timeout)
    }

    /// Discard responses left over from an earlier round.
    pub(crate) fn drain(&self) {
        while self.responses.try_recv().is_ok() {}
    }
}

/// A receiving end for pongs, consumed by the Master's heartbeat.
pub(crate) struct PongStub {
    pongs: Receiver<(NodeId, Pong)>,
}

impl PongStub {
    pub(crate) fn new(pongs: Receiver<(NodeId, Pong)>) -> PongStub {
        PongStub { pongs }
    }

    /// Receive the next pong, waiting until `deadline`.
    pub(crate) fn recv_pong(
        &self,
        deadline: Instant,
    ) -> Result<(NodeId, Pong), ResponseReceiveError> {
        while Instant::now() < deadline {
            match self.pongs.recv_timeout(deadline - Instant::now()) {
                Ok(pong) => return Ok(pong),
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ResponseReceiveError::Disconnected)
                }
            }
        }

        Err(ResponseReceiveError::Timeout)
    }

    /// Discard pongs that answered an earlier beat, so a late straggler cannot grant the
    /// current one.
    pub(crate) fn drain(&self) {
        while self.pongs.try_recv().is_ok() {}
    }
}
