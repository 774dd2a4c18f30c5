//! Futures returned by the suspension primitives of [`ProcessContext`].
//!
//! Each future registers a wait with the kernel on first poll and completes
//! when the kernel has settled it. Dropping a future before it completes
//! withdraws the wait; resource units granted to a dropped request are
//! handed to the next waiter.
//!
//! [`ProcessContext`]: super::ProcessContext

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::{
    SimulationResult,
    process::ProcessId,
    queue::QueueId,
    resource::ResourceId,
    signal::SignalId,
    sim::{
        state::WaitId,
        world::{SignalWait, WeakSimWorld},
    },
};

/// A registered wait, withdrawn on drop unless it was consumed.
struct ParkedWait {
    sim: WeakSimWorld,
    wait: Option<WaitId>,
}

impl ParkedWait {
    fn new(sim: WeakSimWorld) -> Self {
        Self { sim, wait: None }
    }
}

impl Drop for ParkedWait {
    fn drop(&mut self) {
        if let Some(wait) = self.wait.take() {
            if let Ok(sim) = self.sim.upgrade() {
                sim.withdraw_wait(wait);
            }
        }
    }
}

/// Future that completes after a span of simulated time.
pub struct AdvanceFuture {
    parked: ParkedWait,
    process: ProcessId,
    delay: f64,
    completed: bool,
}

impl AdvanceFuture {
    pub(crate) fn new(sim: WeakSimWorld, process: ProcessId, delay: f64) -> Self {
        Self {
            parked: ParkedWait::new(sim),
            process,
            delay,
            completed: false,
        }
    }
}

impl Future for AdvanceFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }
        let sim = match self.parked.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let registered = self.parked.wait;
        let result = match registered {
            None => match sim.begin_advance(self.process, self.delay) {
                Ok(wait) => {
                    self.parked.wait = Some(wait);
                    return Poll::Pending;
                }
                Err(e) => Err(e),
            },
            Some(wait) => match sim.take_wait_outcome(wait) {
                Some(result) => {
                    self.parked.wait = None;
                    result
                }
                None => return Poll::Pending,
            },
        };
        self.completed = true;
        Poll::Ready(result)
    }
}

/// Future that completes once the requested resource units are held, or
/// the request was interrupted.
pub struct AcquireFuture {
    parked: ParkedWait,
    process: ProcessId,
    resource: ResourceId,
    units: usize,
    priority: i32,
    completed: bool,
}

impl AcquireFuture {
    pub(crate) fn new(
        sim: WeakSimWorld,
        process: ProcessId,
        resource: ResourceId,
        units: usize,
        priority: i32,
    ) -> Self {
        Self {
            parked: ParkedWait::new(sim),
            process,
            resource,
            units,
            priority,
            completed: false,
        }
    }
}

impl Future for AcquireFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }
        let sim = match self.parked.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let registered = self.parked.wait;
        let result = match registered {
            None => match sim.begin_acquire(
                self.process,
                self.resource,
                self.units,
                self.priority,
            ) {
                Ok(None) => Ok(()),
                Ok(Some(wait)) => {
                    self.parked.wait = Some(wait);
                    return Poll::Pending;
                }
                Err(e) => Err(e),
            },
            Some(wait) => match sim.take_wait_outcome(wait) {
                Some(result) => {
                    self.parked.wait = None;
                    result
                }
                None => return Poll::Pending,
            },
        };
        self.completed = true;
        Poll::Ready(result)
    }
}

/// Future that completes once at least one of a set of signals is on.
///
/// Resolves to the positions, within the awaited set, of every signal that
/// was on at resumption.
pub struct SignalFuture {
    parked: ParkedWait,
    process: ProcessId,
    signals: Vec<SignalId>,
    completed: bool,
}

impl SignalFuture {
    pub(crate) fn new(sim: WeakSimWorld, process: ProcessId, signals: Vec<SignalId>) -> Self {
        Self {
            parked: ParkedWait::new(sim),
            process,
            signals,
            completed: false,
        }
    }
}

impl Future for SignalFuture {
    type Output = SimulationResult<Vec<usize>>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(Vec::new()));
        }
        let sim = match self.parked.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let registered = self.parked.wait;
        let result = match registered {
            None => match sim.begin_select(self.process, &self.signals) {
                Ok(SignalWait::Ready(on)) => Ok(on),
                Ok(SignalWait::Parked(wait)) => {
                    self.parked.wait = Some(wait);
                    return Poll::Pending;
                }
                Err(e) => Err(e),
            },
            Some(wait) => match sim.settle_signal_wait(wait, &self.signals) {
                Some(result) => {
                    self.parked.wait = None;
                    result
                }
                None => return Poll::Pending,
            },
        };
        self.completed = true;
        Poll::Ready(result)
    }
}

/// Future that completes when the process is explicitly resumed or
/// interrupted.
pub struct PauseFuture {
    parked: ParkedWait,
    process: ProcessId,
    completed: bool,
}

impl PauseFuture {
    pub(crate) fn new(sim: WeakSimWorld, process: ProcessId) -> Self {
        Self {
            parked: ParkedWait::new(sim),
            process,
            completed: false,
        }
    }
}

impl Future for PauseFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }
        let sim = match self.parked.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let registered = self.parked.wait;
        let result = match registered {
            None => match sim.begin_pause(self.process) {
                Ok(wait) => {
                    self.parked.wait = Some(wait);
                    return Poll::Pending;
                }
                Err(e) => Err(e),
            },
            Some(wait) => match sim.take_wait_outcome(wait) {
                Some(result) => {
                    self.parked.wait = None;
                    result
                }
                None => return Poll::Pending,
            },
        };
        self.completed = true;
        Poll::Ready(result)
    }
}

/// Future that completes when the process is popped from a queue, or
/// interrupted while parked in it.
pub struct JoinFuture {
    parked: ParkedWait,
    process: ProcessId,
    queue: QueueId,
    order: Option<i64>,
    completed: bool,
}

impl JoinFuture {
    pub(crate) fn new(
        sim: WeakSimWorld,
        process: ProcessId,
        queue: QueueId,
        order: Option<i64>,
    ) -> Self {
        Self {
            parked: ParkedWait::new(sim),
            process,
            queue,
            order,
            completed: false,
        }
    }
}

impl Future for JoinFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }
        let sim = match self.parked.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let registered = self.parked.wait;
        let result = match registered {
            None => match sim.begin_join(self.process, self.queue, self.order) {
                Ok(wait) => {
                    self.parked.wait = Some(wait);
                    return Poll::Pending;
                }
                Err(e) => Err(e),
            },
            Some(wait) => match sim.take_wait_outcome(wait) {
                Some(result) => {
                    self.parked.wait = None;
                    result
                }
                None => return Poll::Pending,
            },
        };
        self.completed = true;
        Poll::Ready(result)
    }
}
