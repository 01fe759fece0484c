//! Input uniqueness: the single arbiter that prevents double-spends.
//!
//! The notary does not look at state contents.  It only remembers which
//! transaction consumed each [`StateRef`] and refuses any other transaction
//! that tries to consume the same reference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::data::SecureHash;
use crate::states::StateRef;

/// One input that was already consumed elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConflict {
    /// The contested input.
    pub state: StateRef,
    /// Transaction that consumed it first.
    pub consumed_by: SecureHash,
}

impl fmt::Display for StateConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} consumed by {}", self.state, self.consumed_by.short())
    }
}

/// The ordering oracle refused a transaction because inputs were spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} input(s) already consumed", conflicts.len())]
pub struct ConsumptionConflict {
    /// Every contested input.
    pub conflicts: Vec<StateConflict>,
}

/// Decides which transaction may consume a set of inputs.
pub trait OrderingOracle: Send {
    /// Commits `inputs` to `tx_id` atomically, or reports every conflict.
    ///
    /// Re-submitting a transaction that already won is accepted again.
    fn order(&mut self, tx_id: &SecureHash, inputs: &[StateRef]) -> Result<(), ConsumptionConflict>;
}

/// In-memory consumed-input map.
#[derive(Debug, Default)]
pub struct UniquenessProvider {
    committed: HashMap<StateRef, SecureHash>,
}

impl UniquenessProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction that consumed `state`, if any.
    pub fn consumed_by(&self, state: &StateRef) -> Option<SecureHash> {
        self.committed.get(state).copied()
    }
}

impl OrderingOracle for UniquenessProvider {
    fn order(&mut self, tx_id: &SecureHash, inputs: &[StateRef]) -> Result<(), ConsumptionConflict> {
        let conflicts: Vec<StateConflict> = inputs
            .iter()
            .filter_map(|state| match self.committed.get(state) {
                Some(consumer) if consumer != tx_id => Some(StateConflict {
                    state: *state,
                    consumed_by: *consumer,
                }),
                _ => None,
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(ConsumptionConflict { conflicts });
        }
        for state in inputs {
            self.committed.insert(*state, *tx_id);
        }
        Ok(())
    }
}
