/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Learner: records decided instances durably, applies them to the registered state machines
//! in strict log order, and recovers gaps by re-driving consensus.
//!
//! Confirms are accepted in any order and from any sender: each one is persisted under the log's
//! write lock and pushed onto a min-heap keyed by instance id. A single apply worker consumes the
//! heap, so `apply` runs sequentially and in increasing id order without senders having to
//! serialise their confirms. When the worker meets an id above the next expected one, it first
//! fills everything below it, pulling missing instances through [`Learner::learn`].

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use threadpool::ThreadPool;

use crate::app::App;
use crate::events::{ApplyEvent, DecideEvent, Event, LearnEvent};
use crate::messages::ConfirmReq;
use crate::networking::{Network, SenderHandle};
use crate::state::kv_store::LogStore;
use crate::state::log::Log;
use crate::types::basic::{GroupName, InstanceId};
use crate::types::instance::{Instance, InstanceState, Proposal};

use super::proposer::{BoostOutcome, NegotiationOutcome, ProposeDone};
use super::{PaxosNode, Roles};

/// A confirm waiting to be applied. Ordered by instance id; two queued confirms with the same id
/// carry the same decided value (the agreement invariant), so id-only equality is sound.
struct QueuedConfirm {
    instance_id: InstanceId,
    values: Vec<Proposal>,
}

impl PartialEq for QueuedConfirm {
    fn eq(&self, other: &Self) -> bool {
        self.instance_id == other.instance_id
    }
}

impl Eq for QueuedConfirm {}

impl PartialOrd for QueuedConfirm {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedConfirm {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.instance_id.cmp(&other.instance_id)
    }
}

struct ApplyQueue {
    heap: BinaryHeap<Reverse<QueuedConfirm>>,
    shutdown: bool,
}

pub struct Learner<N: Network, K: LogStore> {
    node: Arc<PaxosNode>,
    roles: Weak<Roles<N, K>>,
    log: Arc<Log<K>>,
    sender: Mutex<SenderHandle<N>>,
    queue: Arc<(Mutex<ApplyQueue>, Condvar)>,
    sms: Mutex<HashMap<GroupName, Box<dyn App>>>,
    done_callbacks: Mutex<HashMap<InstanceId, Box<dyn ProposeDone>>>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: LogStore> Learner<N, K> {
    pub(crate) fn new(
        node: Arc<PaxosNode>,
        roles: Weak<Roles<N, K>>,
        log: Arc<Log<K>>,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            node,
            roles,
            log,
            sender: Mutex::new(sender),
            queue: Arc::new((
                Mutex::new(ApplyQueue {
                    heap: BinaryHeap::new(),
                    shutdown: false,
                }),
                Condvar::new(),
            )),
            sms: Mutex::new(HashMap::new()),
            done_callbacks: Mutex::new(HashMap::new()),
            event_publisher,
        }
    }

    /// Register the state machine decided values of `group` are applied to.
    pub fn load_sm(&self, group: GroupName, sm: Box<dyn App>) {
        let replaced = self.sms.lock().unwrap().insert(group.clone(), sm);
        if replaced.is_some() {
            log::warn!("replaced the state machine registered for group {}", group);
        }
    }

    /// Remember a proposal's callback so [`ProposeDone::apply_done`] can fire once the instance
    /// applies on this node.
    pub(crate) fn register_done(&self, instance_id: InstanceId, done: Box<dyn ProposeDone>) {
        self.done_callbacks.lock().unwrap().insert(instance_id, done);
    }

    /// Spawn the apply worker: the single consumer of the priority queue.
    pub(crate) fn start_apply_worker(roles: Weak<Roles<N, K>>) -> JoinHandle<()> {
        let queue = roles
            .upgrade()
            .expect("roles are wired before the worker starts")
            .learner()
            .queue
            .clone();

        thread::Builder::new()
            .name("apply-worker".to_string())
            .spawn(move || loop {
                let item = {
                    let (lock, cvar) = &*queue;
                    let mut q = lock.lock().unwrap();
                    loop {
                        if let Some(Reverse(item)) = q.heap.pop() {
                            break item;
                        }
                        if q.shutdown {
                            return;
                        }
                        q = cvar.wait(q).unwrap();
                    }
                };

                let roles = match roles.upgrade() {
                    Some(roles) => roles,
                    None => return,
                };
                roles.learner().apply(item.instance_id, item.values);
            })
            .expect("could not spawn apply worker thread")
    }

    /// Durably record a decided instance and queue it for application. Safe to call repeatedly
    /// with the same confirm: the apply path drops instances that already applied.
    pub fn handle_confirm_request(&self, req: ConfirmReq) {
        let newly_confirmed = {
            let mut log = self.log.write();
            let mut instance = log
                .instance(req.instance_id)
                .expect("log store is unusable")
                // The prepare message was never received here, only the confirm; the instance
                // has nevertheless reached consensus.
                .unwrap_or_else(|| Instance::prepared(req.instance_id));
            let was_confirmed = instance.state() == InstanceState::Confirmed;
            instance.confirm(req.values.clone());
            log.set_instance(&instance);
            !was_confirmed
        };

        self.node.advance_instance_id(req.instance_id);

        if newly_confirmed {
            Event::Decide(DecideEvent {
                timestamp: SystemTime::now(),
                origin: req.node_id,
                instance_id: req.instance_id,
                values: req.values.clone(),
            })
            .publish(&self.event_publisher);
        }

        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().unwrap();
        queue.heap.push(Reverse(QueuedConfirm {
            instance_id: req.instance_id,
            values: req.values,
        }));
        cvar.notify_one();
    }

    /// Broadcast a decided value to every other member. Fire-and-forget: a member that misses
    /// its confirm recovers through [`Learner::learn`] when the gap is noticed.
    pub fn confirm(&self, instance_id: InstanceId, values: Vec<Proposal>) {
        log::info!("start confirm phase, instanceId: {}", instance_id);
        let req = ConfirmReq {
            node_id: self.node.id().clone(),
            instance_id,
            values,
        };
        let snapshot = self.node.member_view().create_ref();
        let mut sender = self.sender.lock().unwrap().clone();
        for member in snapshot.members_without(self.node.id()) {
            sender.send(member.id(), req.clone());
        }
    }

    /// Recover one missing instance by boosting a noop through consensus, which either seals the
    /// hole or surfaces the value some quorum already accepted. Loops until the instance is
    /// confirmed locally; each round uses a fresh proposal number.
    pub fn learn(&self, instance_id: InstanceId) {
        log::info!("start learn, instanceId: {}", instance_id);
        Event::Learn(LearnEvent {
            timestamp: SystemTime::now(),
            instance_id,
        })
        .publish(&self.event_publisher);

        loop {
            let confirmed = self
                .log
                .read()
                .instance(instance_id)
                .expect("log store is unusable")
                .map_or(false, |instance| {
                    instance.state() == InstanceState::Confirmed
                });
            if confirmed {
                return;
            }

            let roles = match self.roles.upgrade() {
                Some(roles) => roles,
                None => return,
            };
            match roles.proposer().try_boost(
                instance_id,
                vec![Proposal::noop()],
                Box::new(LearnDone { instance_id }),
            ) {
                BoostOutcome::Decided => return,
                BoostOutcome::Refused => continue,
            }
        }
    }

    /// Apply one queued confirm, first making sure every lower instance has applied.
    fn apply(&self, instance_id: InstanceId, values: Vec<Proposal>) {
        let max_applied = self
            .log
            .read()
            .max_applied_instance_id()
            .expect("log store is unusable");
        if instance_id <= max_applied {
            // The instance has been applied.
            return;
        }

        // Fill the gap below the target, lowest id first. `learn` blocks until the missing
        // instance is decided, so this loop is bounded by the true gap size.
        let mut next = max_applied + 1;
        while next < instance_id {
            let instance = self
                .log
                .read()
                .instance(next)
                .expect("log store is unusable");
            match instance {
                Some(instance) if instance.state() == InstanceState::Confirmed => {
                    let values = instance.granted_value().clone();
                    self.apply_one(next, values);
                    next += 1;
                }
                _ => self.learn(next),
            }
        }

        self.apply_one(instance_id, values);
    }

    /// Mark one instance applied (exactly once) and hand its values to the registered state
    /// machines. State machine failures are logged and swallowed so the chain is not
    /// interrupted.
    fn apply_one(&self, instance_id: InstanceId, values: Vec<Proposal>) {
        {
            let mut log = self.log.write();
            let instance = log.instance(instance_id).expect("log store is unusable");
            let mut instance = match instance {
                Some(instance) => instance,
                None => {
                    log::warn!("instance {} vanished before apply", instance_id);
                    return;
                }
            };
            if !instance.set_applied() {
                return;
            }
            log.set_instance_applied(&instance);
        }

        let mut result: Option<Vec<u8>> = None;
        for proposal in &values {
            if proposal.is_noop() {
                log::debug!("instance {} sealed with a noop, nothing to apply", instance_id);
                continue;
            }
            let mut sms = self.sms.lock().unwrap();
            match sms.get_mut(&proposal.group) {
                Some(sm) => match sm.apply(instance_id, &proposal.data) {
                    Ok(output) => result = Some(output),
                    Err(err) => {
                        log::warn!("apply instance[{}] to sm, {}", instance_id, err)
                    }
                },
                None => log::warn!(
                    "no state machine registered for group {}, instance: {}",
                    proposal.group,
                    instance_id
                ),
            }
        }

        Event::Apply(ApplyEvent {
            timestamp: SystemTime::now(),
            instance_id,
        })
        .publish(&self.event_publisher);

        if let Some(done) = self.done_callbacks.lock().unwrap().remove(&instance_id) {
            done.apply_done(result);
        }
    }

    /// Load the stored image (if any) into each registered state machine. Called on boot,
    /// before the apply worker starts.
    pub(crate) fn load_images(&self) {
        let mut sms = self.sms.lock().unwrap();
        for (group, sm) in sms.iter_mut() {
            if let Some(image) = self.log.read().sm_image(group) {
                sm.load_image(&image);
            }
        }
    }

    /// Queue every confirmed-but-unapplied instance for application, and advance the instance
    /// counter past everything the log already knows. Called on boot.
    pub(crate) fn replay_confirmed(&self) {
        let max_applied = self
            .log
            .read()
            .max_applied_instance_id()
            .expect("log store is unusable");
        self.node.advance_instance_id(max_applied);

        let mut next = max_applied + 1;
        while let Some(instance) = self
            .log
            .read()
            .instance(next)
            .expect("log store is unusable")
        {
            self.node.advance_instance_id(next);
            if instance.state() == InstanceState::Confirmed {
                let (lock, cvar) = &*self.queue;
                let mut queue = lock.lock().unwrap();
                queue.heap.push(Reverse(QueuedConfirm {
                    instance_id: next,
                    values: instance.granted_value().clone(),
                }));
                cvar.notify_one();
            }
            next += 1;
        }
    }

    /// Write an image of every registered state machine on a background worker, wait for it, and
    /// release the apply worker. The queue is drained best-effort before the worker exits.
    pub(crate) fn shutdown(&self, pool: &ThreadPool) {
        let (latch, released) = mpsc::channel();
        let roles = self.roles.clone();
        pool.execute(move || {
            if let Some(roles) = roles.upgrade() {
                roles.learner().make_images();
            }
            let _ = latch.send(());
        });
        if released.recv().is_err() {
            log::warn!("image worker hung up before signalling completion");
        }

        let (lock, cvar) = &*self.queue;
        lock.lock().unwrap().shutdown = true;
        cvar.notify_all();
    }

    fn make_images(&self) {
        let sms = self.sms.lock().unwrap();
        for (group, sm) in sms.iter() {
            let image = sm.make_image();
            self.log.write().set_sm_image(group, &image);
        }
    }
}

/// Callback wired into recovery boosts. Recovery has no client to notify, so outcomes are only
/// logged.
struct LearnDone {
    instance_id: InstanceId,
}

impl ProposeDone for LearnDone {
    fn negotiation_done(&self, outcome: NegotiationOutcome) {
        log::debug!(
            "boost negotiation for instance {} ended: {:?}",
            self.instance_id,
            outcome
        );
    }

    fn apply_done(&self, _result: Option<Vec<u8>>) {
        log::debug!("boosted instance {} applied", self.instance_id);
    }
}
