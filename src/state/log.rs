/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! The [`Log`]: a lock-guarded, typed facade over the user-provided [`LogStore`].
//!
//! All durable consensus state goes through this type. The Learner's confirm and apply paths take
//! the write lock; precondition checks on the apply path take the read lock. Guards expose typed
//! accessors so that callers can compose several reads and writes under one lock acquisition,
//! which is what keeps, for example, the lookup-or-create on a confirm atomic.

use borsh::BorshSerialize;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::basic::{GroupName, InstanceId};
use crate::types::instance::Instance;

use super::kv_store::{LogGet, LogGetError, LogStore, WriteBatch};
use super::paths;
use super::paths::combine;

pub struct Log<K: LogStore> {
    store: RwLock<K>,
}

impl<K: LogStore> Log<K> {
    pub fn new(store: K) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Acquire the read lock.
    pub fn read(&self) -> LogReadGuard<K> {
        LogReadGuard {
            store: self.store.read().unwrap(),
        }
    }

    /// Acquire the write lock.
    pub fn write(&self) -> LogWriteGuard<K> {
        LogWriteGuard {
            store: self.store.write().unwrap(),
        }
    }
}

pub struct LogReadGuard<'a, K: LogStore> {
    store: RwLockReadGuard<'a, K>,
}

impl<'a, K: LogStore> LogReadGuard<'a, K> {
    pub fn instance(&self, id: InstanceId) -> Result<Option<Instance>, LogGetError> {
        self.store.instance(id)
    }

    pub fn max_applied_instance_id(&self) -> Result<InstanceId, LogGetError> {
        self.store.max_applied_instance_id()
    }

    pub fn sm_image(&self, group: &GroupName) -> Option<Vec<u8>> {
        self.store.sm_image(group)
    }
}

pub struct LogWriteGuard<'a, K: LogStore> {
    store: RwLockWriteGuard<'a, K>,
}

impl<'a, K: LogStore> LogWriteGuard<'a, K> {
    pub fn instance(&self, id: InstanceId) -> Result<Option<Instance>, LogGetError> {
        self.store.instance(id)
    }

    pub fn max_applied_instance_id(&self) -> Result<InstanceId, LogGetError> {
        self.store.max_applied_instance_id()
    }

    /// Persist an instance record under its id.
    pub fn set_instance(&mut self, instance: &Instance) {
        let mut wb = K::WriteBatch::new();
        wb.set(
            &combine(&paths::INSTANCES, &instance.id().to_le_bytes()),
            &instance.try_to_vec().expect("instances are serializable"),
        );
        self.store.write(wb);
    }

    /// Persist an instance record and the max-applied pointer in one batch, so that a crash
    /// between the two cannot be observed on reboot.
    pub fn set_instance_applied(&mut self, instance: &Instance) {
        let mut wb = K::WriteBatch::new();
        wb.set(
            &combine(&paths::INSTANCES, &instance.id().to_le_bytes()),
            &instance.try_to_vec().expect("instances are serializable"),
        );
        wb.set(
            &paths::MAX_APPLIED_INSTANCE_ID,
            &instance
                .id()
                .try_to_vec()
                .expect("instance ids are serializable"),
        );
        self.store.write(wb);
    }

    pub fn set_sm_image(&mut self, group: &GroupName, image: &[u8]) {
        let mut wb = K::WriteBatch::new();
        wb.set(
            &combine(
                &paths::SM_IMAGES,
                &group.try_to_vec().expect("group names are serializable"),
            ),
            image,
        );
        self.store.write(wb);
    }
}
