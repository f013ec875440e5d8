//! A state machine that keeps track of a single number, used to check that consensus decisions
//! reach every node in the same order.

use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};
use multipaxos_rs::{
    app::{App, ApplyError},
    types::basic::InstanceId,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) enum NumberAppTransaction {
    Increment,
    Add(u32),
}

/// The `history` vector records the number after every apply, so tests can assert not just on
/// the final value but on the order commands were applied in.
pub(crate) struct NumberApp {
    number: Arc<Mutex<u32>>,
    history: Arc<Mutex<Vec<u32>>>,
}

impl NumberApp {
    pub(crate) fn new(number: Arc<Mutex<u32>>, history: Arc<Mutex<Vec<u32>>>) -> NumberApp {
        Self { number, history }
    }
}

impl App for NumberApp {
    fn apply(&mut self, _instance_id: InstanceId, command: &[u8]) -> Result<Vec<u8>, ApplyError> {
        let transaction = NumberAppTransaction::deserialize(&mut &*command)
            .map_err(|_| ApplyError::MalformedCommand)?;

        let mut number = self.number.lock().unwrap();
        match transaction {
            NumberAppTransaction::Increment => *number += 1,
            NumberAppTransaction::Add(addend) => *number += addend,
        }
        self.history.lock().unwrap().push(*number);

        Ok(number.to_le_bytes().to_vec())
    }

    fn make_image(&self) -> Vec<u8> {
        self.number
            .lock()
            .unwrap()
            .try_to_vec()
            .expect("numbers are serializable")
    }

    fn load_image(&mut self, image: &[u8]) {
        *self.number.lock().unwrap() =
            u32::deserialize(&mut &*image).expect("stored image is a number");
    }
}
