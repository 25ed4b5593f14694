use std::{collections::BTreeMap, sync::Mutex};

/// Errors raised by [`SharedAggregate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// The slot was already written in this round.
    #[error("slot {0} was already written")]
    DuplicateSlot(usize),
}

/// A mapping from party index to the value that party contributed in a round.
///
/// Every slot is written at most once; a second write to the same index fails with
/// [`AggregateError::DuplicateSlot`]. Protocol rounds that need to replace contributions use a
/// fresh aggregate instead of overwriting.
#[derive(Debug)]
pub struct SharedAggregate<T> {
    slots: Mutex<BTreeMap<usize, T>>,
}

impl<T> Default for SharedAggregate<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> SharedAggregate<T> {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at slot `index`.
    pub fn add(&self, value: T, index: usize) -> Result<(), AggregateError> {
        let mut slots = self.slots.lock().expect("poison");
        if slots.contains_key(&index) {
            return Err(AggregateError::DuplicateSlot(index));
        }
        slots.insert(index, value);
        Ok(())
    }

    /// Number of slots written so far.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("poison").len()
    }

    /// Whether no slot was written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> SharedAggregate<T> {
    /// The value at slot `index`, if it was written.
    pub fn get(&self, index: usize) -> Option<T> {
        self.slots.lock().expect("poison").get(&index).cloned()
    }

    /// A snapshot of all written values, ordered by index.
    pub fn data(&self) -> Vec<T> {
        self.slots.lock().expect("poison").values().cloned().collect()
    }
}
