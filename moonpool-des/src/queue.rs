//! Ordered queues of parked processes.
//!
//! A process joins a queue with [`ProcessContext::join`] and stays parked
//! until some other actor pops it. Entries are ordered by an order token,
//! lowest first, and by arrival among equal tokens. Joining without a token
//! uses the arrival number, which gives FIFO order.
//!
//! [`ProcessContext::join`]: crate::ProcessContext::join

use std::fmt;

use serde::Serialize;

use crate::{error::SimulationResult, process::ProcessId, sim::world::WeakSimWorld};

/// Unique identifier of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QueueId(usize);

impl QueueId {
    pub(crate) fn new(index: usize) -> Self {
        QueueId(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Handle to a queue owned by a [`SimWorld`](crate::SimWorld).
#[derive(Debug, Clone)]
pub struct Queue {
    id: QueueId,
    sim: WeakSimWorld,
}

impl Queue {
    pub(crate) fn new(id: QueueId, sim: WeakSimWorld) -> Self {
        Self { id, sim }
    }

    /// The queue id.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// The queue name.
    pub fn name(&self) -> SimulationResult<String> {
        self.sim.upgrade()?.queue_name(self.id)
    }

    /// Whether no process is parked here.
    pub fn is_empty(&self) -> SimulationResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of parked processes.
    pub fn len(&self) -> SimulationResult<usize> {
        Ok(self.waiting_processes()?.len())
    }

    /// The process that the next [`pop`](Self::pop) would resume.
    pub fn peek(&self) -> SimulationResult<Option<ProcessId>> {
        Ok(self.waiting_processes()?.first().copied())
    }

    /// Removes the head of the queue and resumes it at the current instant.
    /// Returns the resumed process, or `None` if the queue was empty.
    pub fn pop(&self) -> SimulationResult<Option<ProcessId>> {
        self.sim.upgrade()?.queue_pop(self.id)
    }

    /// Parked processes in pop order.
    pub fn waiting_processes(&self) -> SimulationResult<Vec<ProcessId>> {
        self.sim.upgrade()?.queue_waiters(self.id)
    }
}
