//! In-flight task bookkeeping.
//!
//! One record per cache key with a load in progress. Every descriptor that
//! maps to the key while the load runs joins the same record instead of
//! starting its own. Each record carries a generation number so a task that
//! finishes after its record was cancelled (and maybe replaced by a fresh
//! task for the same key) can tell it has been superseded.
//!
//! The table is plain data; the loader guards it with its mutex and does all
//! notification outside that lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::event::LoadListener;
use crate::request::{CacheKey, RequestDescriptor};

/// A listener waiting on an in-flight task.
#[derive(Clone)]
pub struct Joiner {
    pub descriptor: RequestDescriptor,
    pub listener: Arc<dyn LoadListener>,
}

impl Joiner {
    pub fn new(descriptor: RequestDescriptor, listener: Arc<dyn LoadListener>) -> Self {
        Self {
            descriptor,
            listener,
        }
    }
}

struct InFlightTask {
    generation: u64,
    cancel: CancellationToken,
    joiners: Vec<Joiner>,
}

/// Handle for a newly created task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Map from cache key to in-flight task.
pub struct InFlightTable {
    tasks: HashMap<CacheKey, InFlightTask>,
    next_generation: u64,
    accepting: bool,
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightTable {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_generation: 1,
            accepting: true,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        self.tasks.contains_key(&key)
    }

    /// Appends `joiner` to the task for `key`, handing it back if there is
    /// no such task.
    pub fn join(&mut self, key: CacheKey, joiner: Joiner) -> Result<(), Joiner> {
        match self.tasks.get_mut(&key) {
            Some(task) => {
                task.joiners.push(joiner);
                Ok(())
            }
            None => Err(joiner),
        }
    }

    /// Creates the task for `key` with `first` as its only joiner.
    ///
    /// The caller must have checked that no task exists for `key`.
    pub fn begin(&mut self, key: CacheKey, first: Joiner) -> TaskTicket {
        let generation = self.next_generation;
        self.next_generation += 1;
        let cancel = CancellationToken::new();
        self.tasks.insert(
            key,
            InFlightTask {
                generation,
                cancel: cancel.clone(),
                joiners: vec![first],
            },
        );
        TaskTicket { generation, cancel }
    }

    /// Removes the record for a completed task and returns its joiners.
    ///
    /// Returns `None` when the record is gone or belongs to a newer
    /// generation, meaning the completing task was superseded.
    pub fn finish(&mut self, key: CacheKey, generation: u64) -> Option<Vec<Joiner>> {
        match self.tasks.get(&key) {
            Some(task) if task.generation == generation => {
                self.tasks.remove(&key).map(|task| task.joiners)
            }
            _ => None,
        }
    }

    /// Removes the record for `key` regardless of generation, cancelling its
    /// token. Returns the joiners that were waiting.
    pub fn remove(&mut self, key: CacheKey) -> Option<Vec<Joiner>> {
        self.tasks.remove(&key).map(|task| {
            task.cancel.cancel();
            task.joiners
        })
    }

    /// Stops accepting new tasks.
    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    /// Removes and cancels every task, returning all joiners.
    pub fn drain(&mut self) -> Vec<Joiner> {
        self.tasks
            .drain()
            .flat_map(|(_, task)| {
                task.cancel.cancel();
                task.joiners
            })
            .collect()
    }
}
