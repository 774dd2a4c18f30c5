//! Counted resources with a prioritized waiting line.
//!
//! A request asks for one or more units. The line is served from its head
//! only: when the head asks for more units than are free, requests behind it
//! wait too, even if they would fit.

use std::fmt;

use serde::Serialize;

use crate::{
    error::SimulationResult,
    process::ProcessId,
    sim::{state::ResourceState, world::WeakSimWorld},
};

/// Unique identifier of a resource, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(usize);

impl ResourceId {
    /// Wrap a raw index.
    pub fn new(index: usize) -> Self {
        ResourceId(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Point-in-time view of a resource, as seen by selectors and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    /// Resource id.
    pub id: ResourceId,
    /// Resource name.
    pub name: String,
    /// Configured number of units.
    pub capacity: usize,
    /// Units currently held. May exceed `capacity` right after a reduction.
    pub in_use: usize,
    /// Processes in the waiting line.
    pub waiting: usize,
    /// Units granted since creation.
    pub total_grants: u64,
}

impl ResourceSnapshot {
    pub(crate) fn from_state(state: &ResourceState) -> Self {
        Self {
            id: state.id,
            name: state.name.clone(),
            capacity: state.capacity,
            in_use: state.in_use,
            waiting: state.line.len(),
            total_grants: state.grants,
        }
    }

    /// Holders plus waiters.
    pub fn occupancy(&self) -> usize {
        self.in_use + self.waiting
    }

    /// Units that could be granted right now.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use)
    }
}

/// Handle to a resource owned by a [`SimWorld`](crate::SimWorld).
///
/// Acquire and release go through [`ProcessContext`](crate::ProcessContext),
/// since they act on behalf of a process.
#[derive(Debug, Clone)]
pub struct Resource {
    id: ResourceId,
    sim: WeakSimWorld,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, sim: WeakSimWorld) -> Self {
        Self { id, sim }
    }

    /// The resource id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The resource name.
    pub fn name(&self) -> SimulationResult<String> {
        Ok(self.snapshot()?.name)
    }

    /// Current state of the resource.
    pub fn snapshot(&self) -> SimulationResult<ResourceSnapshot> {
        self.sim.upgrade()?.resource_snapshot(self.id)
    }

    /// Changes the number of units.
    ///
    /// Extra units are granted to waiters immediately. A reduction never
    /// takes units back: holders keep them and the line stalls until enough
    /// releases bring usage under the new capacity. Zero models a full
    /// outage.
    pub fn set_capacity(&self, capacity: usize) -> SimulationResult<()> {
        self.sim.upgrade()?.set_capacity(self.id, capacity)
    }

    /// Units held by `process`.
    pub fn holds(&self, process: ProcessId) -> SimulationResult<usize> {
        self.sim.upgrade()?.resource_holds(self.id, process)
    }

    /// Waiting processes in service order.
    pub fn waiting_processes(&self) -> SimulationResult<Vec<ProcessId>> {
        self.sim.upgrade()?.resource_waiters(self.id)
    }
}

/// Units of a resource held by a process for the lifetime of this guard.
///
/// Obtained from [`ProcessContext::hold`](crate::ProcessContext::hold).
/// The units go back when the guard is dropped, or through
/// [`release`](Self::release), which reports errors instead of swallowing
/// them.
#[derive(Debug)]
#[must_use = "dropping a hold releases its units immediately"]
pub struct Hold {
    sim: WeakSimWorld,
    process: ProcessId,
    resource: Resource,
    units: usize,
    released: bool,
}

impl Hold {
    pub(crate) fn new(
        sim: WeakSimWorld,
        process: ProcessId,
        resource: Resource,
        units: usize,
    ) -> Self {
        Self {
            sim,
            process,
            resource,
            units,
            released: false,
        }
    }

    /// The held resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Number of units held.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Gives the units back now.
    pub fn release(mut self) -> SimulationResult<()> {
        self.released = true;
        self.sim
            .upgrade()?
            .release(self.process, self.resource.id(), self.units)
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(sim) = self.sim.upgrade() {
            sim.return_units(self.process, self.resource.id(), self.units);
        }
    }
}
