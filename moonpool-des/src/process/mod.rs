//! Processes: the actors of a simulation.
//!
//! A process is an async behavior driven by the [`SimWorld`]. It
//! interacts with simulated time only through its [`ProcessContext`]: every
//! suspension primitive returns a future that completes when the kernel
//! resumes the process, so behaviors can suspend from any call depth by
//! awaiting.
//!
//! [`SimWorld`]: crate::SimWorld

mod wait;

use std::fmt;
use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use crate::{
    error::SimulationResult,
    queue::Queue,
    resource::{Hold, Resource},
    signal::Signal,
    sim::world::WeakSimWorld,
    tags::TagSet,
    time::SimTime,
};

pub use wait::{AcquireFuture, AdvanceFuture, JoinFuture, PauseFuture, SignalFuture};

/// Unique identifier of a process, assigned in spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProcessId(usize);

impl ProcessId {
    /// Wrap a raw index.
    pub fn new(index: usize) -> Self {
        ProcessId(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Lifecycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessStatus {
    /// Spawned, first step not yet run.
    Pending,
    /// Currently being resumed.
    Running,
    /// Waiting on time, a resource, a signal or an explicit resume.
    Suspended,
    /// Behavior finished or faulted. Tags stay readable.
    Terminated,
}

/// Read-only view of a process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    /// Process id.
    pub id: ProcessId,
    /// Process name.
    pub name: String,
    /// Current status.
    pub status: ProcessStatus,
    /// Copy of its tags.
    pub tags: TagSet,
}

/// The handle a behavior uses to talk to the kernel.
///
/// Suspension primitives ([`advance`](Self::advance),
/// [`acquire`](Self::acquire), [`hold`](Self::hold),
/// [`wait_for`](Self::wait_for), [`select`](Self::select),
/// [`join`](Self::join), [`pause`](Self::pause)) must be awaited by the
/// process that owns the context; used from anywhere else they fail with
/// [`SimulationError::InvalidState`](crate::SimulationError::InvalidState).
///
/// The futures only make progress under the world's own run loop. Awaiting
/// them from a foreign executor never completes.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    sim: WeakSimWorld,
    id: ProcessId,
}

impl ProcessContext {
    pub(crate) fn new(sim: WeakSimWorld, id: ProcessId) -> Self {
        Self { sim, id }
    }

    /// Id of the owning process.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Name of the owning process.
    pub fn name(&self) -> SimulationResult<String> {
        let sim = self.sim.upgrade()?;
        Ok(sim.process_name(self.id).unwrap_or_default())
    }

    /// Current simulated time.
    pub fn now(&self) -> SimulationResult<SimTime> {
        self.sim.now()
    }

    /// The world this process lives in.
    pub fn world(&self) -> &WeakSimWorld {
        &self.sim
    }

    /// Suspends for `delay` units of simulated time.
    ///
    /// `advance(0.0)` yields: the process resumes at the same instant after
    /// every event already queued for it. A negative or non-finite delay
    /// fails with `InvalidDuration`.
    pub fn advance(&self, delay: f64) -> AdvanceFuture {
        AdvanceFuture::new(self.sim.clone(), self.id, delay)
    }

    /// Acquires one unit of `resource`.
    ///
    /// Higher `priority` is served first; equal priorities are served in
    /// arrival order. When a unit is free and nobody of equal or higher
    /// priority is waiting, the grant happens without suspending. A waiting
    /// request can be withdrawn with [`SimWorld::interrupt`], in which case
    /// it resolves with `Interrupted` and no unit is held.
    ///
    /// [`SimWorld::interrupt`]: crate::SimWorld::interrupt
    pub fn acquire(&self, resource: &Resource, priority: i32) -> AcquireFuture {
        self.acquire_units(resource, 1, priority)
    }

    /// Acquires `units` units of `resource` at once.
    ///
    /// Asking for zero units, or for more than the resource's capacity, fails
    /// with `ResourceMisuse`. During an outage the last non-zero capacity
    /// is the limit.
    pub fn acquire_units(
        &self,
        resource: &Resource,
        units: usize,
        priority: i32,
    ) -> AcquireFuture {
        AcquireFuture::new(self.sim.clone(), self.id, resource.id(), units, priority)
    }

    /// Returns one unit of `resource`.
    ///
    /// Waiters are granted the freed unit at the current instant. Releasing
    /// a unit this process does not hold fails with `ResourceMisuse`.
    pub fn release(&self, resource: &Resource) -> SimulationResult<()> {
        self.release_units(resource, 1)
    }

    /// Returns `units` units of `resource`. Fails with `ResourceMisuse`,
    /// returning nothing, if this process holds fewer.
    pub fn release_units(&self, resource: &Resource, units: usize) -> SimulationResult<()> {
        self.sim.upgrade()?.release(self.id, resource.id(), units)
    }

    /// Acquires `units` of `resource` and wraps them in a [`Hold`] that
    /// gives them back when dropped.
    ///
    /// ```rust
    /// use moonpool_des::SimWorld;
    ///
    /// let mut sim = SimWorld::new();
    /// let desk = sim.create_resource("desk", 1).unwrap();
    /// let d = desk.clone();
    /// sim.spawn("clerk", move |ctx| async move {
    ///     let _desk = ctx.hold(&d, 1, 0).await?;
    ///     ctx.advance(2.0).await
    /// })
    /// .unwrap();
    /// sim.run().unwrap();
    /// assert_eq!(desk.snapshot().unwrap().in_use, 0);
    /// ```
    pub async fn hold(
        &self,
        resource: &Resource,
        units: usize,
        priority: i32,
    ) -> SimulationResult<Hold> {
        self.acquire_units(resource, units, priority).await?;
        Ok(Hold::new(self.sim.clone(), self.id, resource.clone(), units))
    }

    /// Parks in `queue`, in FIFO order, until another actor pops this
    /// process.
    pub fn join(&self, queue: &Queue) -> JoinFuture {
        JoinFuture::new(self.sim.clone(), self.id, queue.id(), None)
    }

    /// Parks in `queue` ahead of every entry with a larger `order` token.
    /// Entries with equal tokens keep arrival order.
    pub fn join_ordered(&self, queue: &Queue, order: i64) -> JoinFuture {
        JoinFuture::new(self.sim.clone(), self.id, queue.id(), Some(order))
    }

    /// Waits until `signal` is on. Returns immediately if it already is.
    pub async fn wait_for(&self, signal: &Signal) -> SimulationResult<()> {
        self.select(&[signal]).await.map(|_| ())
    }

    /// Waits until at least one of `signals` is on and returns the positions
    /// of every signal that is on when the process resumes.
    pub fn select(&self, signals: &[&Signal]) -> SignalFuture {
        let ids = signals.iter().map(|signal| signal.id()).collect();
        SignalFuture::new(self.sim.clone(), self.id, ids)
    }

    /// Suspends until another actor calls [`SimWorld::resume`] for this
    /// process.
    ///
    /// [`SimWorld::resume`]: crate::SimWorld::resume
    pub fn pause(&self) -> PauseFuture {
        PauseFuture::new(self.sim.clone(), self.id)
    }

    /// Asks the run loop to stop after the current resumption.
    pub fn stop(&self) -> SimulationResult<()> {
        self.sim.upgrade()?.stop();
        Ok(())
    }

    /// Withdraws the interruptible waits of another process.
    pub fn interrupt(&self, process: ProcessId) -> SimulationResult<bool> {
        Ok(self.sim.upgrade()?.interrupt(process))
    }

    /// Wakes another process suspended in [`pause`](Self::pause).
    pub fn resume(&self, process: ProcessId) -> SimulationResult<bool> {
        Ok(self.sim.upgrade()?.resume(process))
    }

    /// Spawns a child at the current instant. The child starts with a copy
    /// of this process's tags; later changes on either side stay separate.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, behavior: F) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let sim = self.sim.upgrade()?;
        let tags = sim.with_tags(self.id, TagSet::clone)?;
        sim.spawn_process(name.into(), tags, sim.now(), behavior)
    }

    /// Reads one tag of this process.
    pub fn tag(&self, name: &str) -> SimulationResult<Option<Value>> {
        self.sim
            .upgrade()?
            .with_tags(self.id, |tags| tags.get(name).cloned())
    }

    /// Whether this process carries `name`.
    pub fn has_tag(&self, name: &str) -> SimulationResult<bool> {
        self.sim
            .upgrade()?
            .with_tags(self.id, |tags| tags.contains(name))
    }

    /// A copy of all tags of this process.
    pub fn tags(&self) -> SimulationResult<TagSet> {
        self.sim.upgrade()?.with_tags(self.id, TagSet::clone)
    }

    /// Sets a tag, returning the previous value.
    pub fn set_tag(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> SimulationResult<Option<Value>> {
        self.sim
            .upgrade()?
            .with_tags_mut(self.id, |tags| tags.set(name, value))
    }

    /// Removes a tag, returning its value.
    pub fn remove_tag(&self, name: &str) -> SimulationResult<Option<Value>> {
        self.sim
            .upgrade()?
            .with_tags_mut(self.id, |tags| tags.remove(name))
    }
}
