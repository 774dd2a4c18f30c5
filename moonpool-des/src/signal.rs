//! Boolean conditions processes can wait on.

use std::fmt;

use serde::Serialize;

use crate::{error::SimulationResult, sim::world::WeakSimWorld};

/// Unique identifier of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SignalId(usize);

impl SignalId {
    pub(crate) fn new(index: usize) -> Self {
        SignalId(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Handle to a signal owned by a [`SimWorld`](crate::SimWorld).
///
/// Turning a signal on wakes every process waiting on it, in the order they
/// started waiting. A woken process that finds the signal off again keeps
/// waiting.
#[derive(Debug, Clone)]
pub struct Signal {
    id: SignalId,
    sim: WeakSimWorld,
}

impl Signal {
    pub(crate) fn new(id: SignalId, sim: WeakSimWorld) -> Self {
        Self { id, sim }
    }

    /// The signal id.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// The signal name.
    pub fn name(&self) -> SimulationResult<String> {
        self.sim.upgrade()?.signal_name(self.id)
    }

    /// Whether the signal is on.
    pub fn is_on(&self) -> SimulationResult<bool> {
        self.sim.upgrade()?.signal_is_on(self.id)
    }

    /// Number of processes waiting on this signal.
    pub fn waiting(&self) -> SimulationResult<usize> {
        self.sim.upgrade()?.signal_waiting(self.id)
    }

    /// Turns the signal on, returning how many waiters were woken.
    pub fn turn_on(&self) -> SimulationResult<usize> {
        self.sim.upgrade()?.turn_on(self.id)
    }

    /// Turns the signal off. Waiters already woken still run.
    pub fn turn_off(&self) -> SimulationResult<()> {
        self.sim.upgrade()?.turn_off(self.id)
    }
}
