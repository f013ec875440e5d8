/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The membership view `M`: the set of peers this node believes the cluster consists of, the
//! elected master (if any), and a strictly monotonic version.
//!
//! Structural mutations are serialised by the view's own lock and every mutation increments the
//! version. Readers never lock for the version, and [`MemberView::create_ref`] hands out a deep,
//! internally-consistent snapshot for iteration off the lock.

use indexmap::IndexMap;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex, OnceLock,
};

use super::basic::ViewVersion;
use super::endpoint::{Endpoint, NodeId};

/// Observer invoked after the master changes. Wired once, after construction, so the view itself
/// never holds a role object.
pub(crate) type MasterObserver = Box<dyn Fn(&NodeId) + Send + Sync>;

pub struct MemberView {
    inner: Mutex<Members>,
    version: AtomicU32,
    on_change_master: OnceLock<MasterObserver>,
}

struct Members {
    members: IndexMap<NodeId, Endpoint>,
    master: Option<NodeId>,
}

impl MemberView {
    /// Create a view over the initial peer list with no master and version 0.
    pub fn new(members: Vec<Endpoint>) -> Self {
        let members = members
            .into_iter()
            .map(|endpoint| (endpoint.id().clone(), endpoint))
            .collect();
        Self {
            inner: Mutex::new(Members {
                members,
                master: None,
            }),
            version: AtomicU32::new(ViewVersion::init().int()),
            on_change_master: OnceLock::new(),
        }
    }

    /// Register the master-change observer. Called exactly once while wiring roles.
    pub(crate) fn set_master_observer(&self, observer: MasterObserver) {
        let _ = self.on_change_master.set(observer);
    }

    pub fn version(&self) -> ViewVersion {
        ViewVersion::new(self.version.load(Ordering::SeqCst))
    }

    /// Add a member. A no-op if an endpoint with the same id is already present.
    pub fn write_on(&self, endpoint: Endpoint) {
        let mut inner = self.inner.lock().unwrap();
        if inner.members.contains_key(endpoint.id()) {
            return;
        }
        inner.members.insert(endpoint.id().clone(), endpoint);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove a member. If it was the master, the master becomes unset.
    pub fn write_off(&self, id: &NodeId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.members.shift_remove(id).is_none() {
            return;
        }
        if inner.master.as_ref() == Some(id) {
            inner.master = None;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Promote `id` to master. Returns false (and leaves the view untouched) if `id` is not a
    /// member.
    pub fn change_master(&self, id: &NodeId) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.members.contains_key(id) {
                return false;
            }
            inner.master = Some(id.clone());
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        log::info!(
            "node-{} was promoted to master, version: {}",
            id,
            self.version()
        );
        if let Some(observer) = self.on_change_master.get() {
            observer(id);
        }
        true
    }

    /// Take a deep, frozen snapshot safe for concurrent readers.
    pub fn create_ref(&self) -> MemberViewSnapshot {
        let inner = self.inner.lock().unwrap();
        let master = inner
            .master
            .as_ref()
            .and_then(|id| inner.members.get(id).cloned());
        MemberViewSnapshot {
            members: inner.members.clone(),
            master,
            version: self.version(),
        }
    }

    /// Replace the contents atomically. Used after loading a state machine image.
    pub fn load_snap(&self, snap: MemberViewSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        inner.members = snap.members;
        inner.master = snap.master.map(|endpoint| endpoint.id().clone());
        self.version.store(snap.version.int(), Ordering::SeqCst);
    }

    pub fn master(&self) -> Option<Endpoint> {
        let inner = self.inner.lock().unwrap();
        inner
            .master
            .as_ref()
            .and_then(|id| inner.members.get(id).cloned())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.lock().unwrap().members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deep copy of the view at one version. Internally consistent: the master, member list, and
/// version were all read under one lock acquisition.
#[derive(Clone)]
pub struct MemberViewSnapshot {
    members: IndexMap<NodeId, Endpoint>,
    master: Option<Endpoint>,
    version: ViewVersion,
}

impl MemberViewSnapshot {
    /// Rebuild a snapshot from its serialized parts. A master id that names no member is
    /// dropped.
    pub(crate) fn restore(
        members: Vec<Endpoint>,
        master: Option<NodeId>,
        version: ViewVersion,
    ) -> Self {
        let members: IndexMap<NodeId, Endpoint> = members
            .into_iter()
            .map(|endpoint| (endpoint.id().clone(), endpoint))
            .collect();
        let master = master.and_then(|id| members.get(&id).cloned());
        Self {
            members,
            master,
            version,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Endpoint> {
        self.members.values()
    }

    /// Every member except `id`. The heartbeat path grants itself locally and pings the rest.
    pub fn members_without(&self, id: &NodeId) -> impl Iterator<Item = &Endpoint> {
        let id = id.clone();
        self.members
            .values()
            .filter(move |endpoint| *endpoint.id() != id)
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.members.values().cloned().collect()
    }

    pub fn master(&self) -> Option<&Endpoint> {
        self.master.as_ref()
    }

    pub fn version(&self) -> ViewVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(NodeId::new(id), "127.0.0.1", 8080)
    }

    #[test]
    fn version_is_strictly_monotonic_across_mutations() {
        let view = MemberView::new(vec![endpoint("a"), endpoint("b")]);
        assert_eq!(view.version(), ViewVersion::init());

        view.write_on(endpoint("c"));
        assert_eq!(view.version(), ViewVersion::new(1));

        assert!(view.change_master(&NodeId::new("a")));
        assert_eq!(view.version(), ViewVersion::new(2));

        view.write_off(&NodeId::new("c"));
        assert_eq!(view.version(), ViewVersion::new(3));
    }

    #[test]
    fn change_master_requires_membership() {
        let view = MemberView::new(vec![endpoint("a")]);
        assert!(!view.change_master(&NodeId::new("ghost")));
        assert_eq!(view.version(), ViewVersion::init());
        assert!(view.master().is_none());
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let view = MemberView::new(vec![endpoint("a"), endpoint("b")]);
        view.change_master(&NodeId::new("b"));

        let snap = view.create_ref();
        view.write_off(&NodeId::new("b"));

        assert_eq!(snap.len(), 2);
        assert_eq!(snap.master().unwrap().id(), &NodeId::new("b"));
        assert!(view.master().is_none());
    }

    #[test]
    fn write_off_master_unsets_it() {
        let view = MemberView::new(vec![endpoint("a"), endpoint("b")]);
        view.change_master(&NodeId::new("a"));
        view.write_off(&NodeId::new("a"));
        assert!(view.master().is_none());
    }
}
