/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Byte-prefixes that specify where each log variable is stored in the user-provided key-value
//! store.
//!
//! Each variable is stored as **Borsh-serialized values** in one or more **keys**:
//!
//! ## Single values
//!
//! "Single values" (the max-applied pointer) are stored in one-byte, constant keys defined in
//! constants sharing the variable's name.
//!
//! ## Mappings
//!
//! Mappings of the form "`A` -> `B`" (instances, keyed by instance id; state machine images, keyed
//! by group name) are stored in multiple keys, each key being the concatenation of a constant
//! one-byte prefix sharing the variable's name and the serialization of an instance of the `A`
//! type. Instance ids are serialized little-endian so that a store with ordered iteration keeps
//! the log in id order.

// State variables
pub const INSTANCES: [u8; 1] = [0];
pub const MAX_APPLIED_INSTANCE_ID: [u8; 1] = [1];
pub const SM_IMAGES: [u8; 1] = [2];

/// Concatenate two byteslices into one vector.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
