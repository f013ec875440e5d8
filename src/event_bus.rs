/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the replica's threads and passes them to event handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it triggers the
//! execution of all handlers defined for the contained event type, where the handlers for each
//! event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers` this thread is not
//! started.
//!
//! ## Event Handlers
//!
//! A replica's instance of `EventHandlers` contains:
//! 1. The handlers provided upon building the replica via
//!    [`ReplicaSpec`](crate::replica::ReplicaSpec), and
//! 2. If logging is enabled via the replica's [config](crate::replica::Configuration) then also
//!    the default logging handlers defined in [logging](crate::logging).

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type that implements the [`Logger`]
/// trait, namely one logging handler, defined in [`logging`](crate::logging), and one
/// user-defined handler, passed to [`ReplicaSpec`](crate::replica::ReplicaSpec).
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    pub(crate) fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the default logging handler
    /// if logging is enabled.
    pub(crate) fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    /// Triggers the execution of each of the two handlers, if defined.
    fn fire(&self, event: &T) {
        self.user_defined_handler
            .iter()
            .for_each(|handler| handler(event));
        self.logging_handler
            .iter()
            .for_each(|handler| handler(event));
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers for each pre-defined
/// event type from [events](crate::events).
pub(crate) struct EventHandlers {
    pub(crate) propose_handlers: HandlerPair<ProposeEvent>,
    pub(crate) prepare_handlers: HandlerPair<PrepareEvent>,
    pub(crate) accept_handlers: HandlerPair<AcceptEvent>,

    pub(crate) decide_handlers: HandlerPair<DecideEvent>,
    pub(crate) apply_handlers: HandlerPair<ApplyEvent>,
    pub(crate) learn_handlers: HandlerPair<LearnEvent>,

    pub(crate) start_election_handlers: HandlerPair<StartElectionEvent>,
    pub(crate) change_master_handlers: HandlerPair<ChangeMasterEvent>,
    pub(crate) receive_heartbeat_handlers: HandlerPair<ReceiveHeartbeatEvent>,
    pub(crate) change_member_handlers: HandlerPair<ChangeMemberEvent>,
}

impl EventHandlers {
    /// Creates the [handler pairs](HandlerPair) for all pre-defined event types from
    /// [events](crate::events) given the user-defined handlers, and information on whether
    /// logging is enabled.
    pub(crate) fn new(
        log: bool,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        accept_handler: Option<HandlerPtr<AcceptEvent>>,
        decide_handler: Option<HandlerPtr<DecideEvent>>,
        apply_handler: Option<HandlerPtr<ApplyEvent>>,
        learn_handler: Option<HandlerPtr<LearnEvent>>,
        start_election_handler: Option<HandlerPtr<StartElectionEvent>>,
        change_master_handler: Option<HandlerPtr<ChangeMasterEvent>>,
        receive_heartbeat_handler: Option<HandlerPtr<ReceiveHeartbeatEvent>>,
        change_member_handler: Option<HandlerPtr<ChangeMemberEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            propose_handlers: HandlerPair::new(log, propose_handler),
            prepare_handlers: HandlerPair::new(log, prepare_handler),
            accept_handlers: HandlerPair::new(log, accept_handler),
            decide_handlers: HandlerPair::new(log, decide_handler),
            apply_handlers: HandlerPair::new(log, apply_handler),
            learn_handlers: HandlerPair::new(log, learn_handler),
            start_election_handlers: HandlerPair::new(log, start_election_handler),
            change_master_handlers: HandlerPair::new(log, change_master_handler),
            receive_heartbeat_handlers: HandlerPair::new(log, receive_heartbeat_handler),
            change_member_handlers: HandlerPair::new(log, change_member_handler),
        }
    }

    /// Checks if no handlers are defined, i.e., neither user-defined handlers were defined nor
    /// logging is enabled.
    pub(crate) fn is_empty(&self) -> bool {
        self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.accept_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.apply_handlers.is_empty()
            && self.learn_handlers.is_empty()
            && self.start_election_handlers.is_empty()
            && self.change_master_handlers.is_empty()
            && self.receive_heartbeat_handlers.is_empty()
            && self.change_member_handlers.is_empty()
    }

    /// Triggers the execution of each of the two handlers - the user-defined and the logging
    /// handler, if defined - for a given event type from [events](crate::events).
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::Propose(propose_event) => self.propose_handlers.fire(&propose_event),
            Event::Prepare(prepare_event) => self.prepare_handlers.fire(&prepare_event),
            Event::Accept(accept_event) => self.accept_handlers.fire(&accept_event),
            Event::Decide(decide_event) => self.decide_handlers.fire(&decide_event),
            Event::Apply(apply_event) => self.apply_handlers.fire(&apply_event),
            Event::Learn(learn_event) => self.learn_handlers.fire(&learn_event),
            Event::StartElection(start_election_event) => {
                self.start_election_handlers.fire(&start_election_event)
            }
            Event::ChangeMaster(change_master_event) => {
                self.change_master_handlers.fire(&change_master_event)
            }
            Event::ReceiveHeartbeat(receive_heartbeat_event) => {
                self.receive_heartbeat_handlers.fire(&receive_heartbeat_event)
            }
            Event::ChangeMember(change_member_event) => {
                self.change_member_handlers.fire(&change_member_event)
            }
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown signal is received
/// from the parent thread. In each iteration of the loop, the thread checks if it received any
/// event notifications, and if so, then triggers the execution of the handlers defined for the
/// event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The publishing sides hang up during shutdown; keep draining until the shutdown
            // signal arrives.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
