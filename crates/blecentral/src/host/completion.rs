//! Correlation of completions with the operations that asked for them

use crate::error::Error;
use crate::gatt::{Operation, Outcome};
use crate::hci::ConnectionHandle;
use log::trace;
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Callback invoked once when an operation finishes
pub type Completion = Box<dyn FnOnce(Result<Outcome, Error>)>;

/// What a completion is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionKey {
    pub connection: ConnectionHandle,
    pub operation: Operation,
    /// Attribute the operation is keyed on, 0 for link-wide operations
    pub handle: u16,
}

/// Pending completions. Several callbacks may wait on the same key; they are
/// resolved in the order they were registered, each exactly once.
#[derive(Default)]
pub struct CompletionTable {
    pending: HashMap<CompletionKey, VecDeque<Completion>>,
}

impl fmt::Debug for CompletionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTable")
            .field("pending", &self.len())
            .finish()
    }
}

impl CompletionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn register(&mut self, key: CompletionKey, completion: Completion) {
        self.pending.entry(key).or_default().push_back(completion);
    }

    fn take(&mut self, key: &CompletionKey) -> Option<Completion> {
        let queue = self.pending.get_mut(key)?;
        let completion = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(key);
        }
        completion
    }

    /// Resolve the oldest completion waiting on `key`. Returns whether there
    /// was one.
    pub fn resolve(&mut self, key: CompletionKey, result: Result<Outcome, Error>) -> bool {
        match self.take(&key) {
            Some(completion) => {
                completion(result);
                true
            }
            None => {
                trace!("No completion waiting for {:?}", key);
                false
            }
        }
    }

    /// Resolve every completion waiting on `key` with a result built per call
    pub fn resolve_each<F>(&mut self, key: CompletionKey, mut result: F) -> usize
    where
        F: FnMut() -> Result<Outcome, Error>,
    {
        let waiting = self.pending.remove(&key).unwrap_or_default();
        let count = waiting.len();
        for completion in waiting {
            completion(result());
        }
        count
    }

    /// Resolve everything waiting on one connection
    pub fn resolve_connection<F>(&mut self, connection: ConnectionHandle, mut error: F) -> usize
    where
        F: FnMut() -> Error,
    {
        let keys: Vec<_> = self
            .pending
            .keys()
            .filter(|key| key.connection == connection)
            .copied()
            .collect();
        keys.into_iter()
            .map(|key| self.resolve_each(key, || Err(error())))
            .sum()
    }

    /// Resolve everything, on every connection
    pub fn resolve_all<F>(&mut self, mut error: F) -> usize
    where
        F: FnMut() -> Error,
    {
        let keys: Vec<_> = self.pending.keys().copied().collect();
        keys.into_iter()
            .map(|key| self.resolve_each(key, || Err(error())))
            .sum()
    }
}
