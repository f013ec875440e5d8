/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Defines the [`LogStore`] trait, which specifies the required interface for the key-value store
//! provided by the user, and the [`LogGet`] trait of typed default getters over it.
//!
//! The consensus engine persists three variables through this interface: the per-instance records
//! of the replicated log, the max-applied-instance pointer, and the periodic state machine images.
//! The key layout is described in [`super::paths`].

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::Display;

use crate::types::basic::{GroupName, InstanceId};
use crate::types::instance::Instance;

use super::paths;
use super::paths::combine;

pub trait LogStore: LogGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + LogGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub trait LogGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Instances ↓↓↓ */

    fn instance(&self, id: InstanceId) -> Result<Option<Instance>, LogGetError> {
        if let Some(bytes) = self.get(&combine(&paths::INSTANCES, &id.to_le_bytes())) {
            Ok(Some(Instance::deserialize(&mut &*bytes).map_err(|err| {
                LogGetError::DeserializeValueError {
                    key: Key::Instance { id },
                    source: err,
                }
            })?))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Max Applied Instance Id ↓↓↓ */

    fn max_applied_instance_id(&self) -> Result<InstanceId, LogGetError> {
        if let Some(bytes) = self.get(&paths::MAX_APPLIED_INSTANCE_ID) {
            InstanceId::deserialize(&mut &*bytes).map_err(|err| {
                LogGetError::DeserializeValueError {
                    key: Key::MaxAppliedInstanceId,
                    source: err,
                }
            })
        } else {
            Ok(InstanceId::init())
        }
    }

    /* ↓↓↓ State Machine Images ↓↓↓ */

    fn sm_image(&self, group: &GroupName) -> Option<Vec<u8>> {
        self.get(&combine(
            &paths::SM_IMAGES,
            &group.try_to_vec().expect("group names are serializable"),
        ))
    }
}

/// Error when trying to read a value corresponding to a given key from the [log store][LogStore].
#[derive(Debug)]
pub enum LogGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueNotFound { key: Key },
}

impl Display for LogGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogGetError::DeserializeValueError { key, source } => {
                write!(f, "could not deserialize value for {}: {}", key, source)
            }
            LogGetError::ValueNotFound { key } => write!(f, "no value found for {}", key),
        }
    }
}

#[derive(Debug)]
pub enum Key {
    Instance { id: InstanceId },
    MaxAppliedInstanceId,
    SmImage { group: GroupName },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            Key::Instance { id } => write!(f, "Instance {}", id),
            Key::MaxAppliedInstanceId => write!(f, "Max Applied Instance Id"),
            Key::SmImage { group } => write!(f, "State Machine Image for group {}", group),
        }
    }
}
