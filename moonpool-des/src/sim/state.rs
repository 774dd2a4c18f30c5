//! Internal state tables owned by the kernel.
//!
//! Processes, waits, resources and signals all live here, indexed by their
//! ids. Handles handed out to user code only carry the id and a weak pointer
//! back to the world.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
    fmt,
};

use futures::future::LocalBoxFuture;

use crate::{
    error::SimulationResult,
    process::{ProcessId, ProcessStatus},
    queue::QueueId,
    resource::ResourceId,
    signal::SignalId,
    sim::events::EventHandle,
    tags::TagSet,
};

/// Identifier of one registered resumption condition of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitId(u64);

impl WaitId {
    pub(crate) fn new(raw: u64) -> Self {
        WaitId(raw)
    }
}

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W#{}", self.0)
    }
}

/// A registered process.
pub(crate) struct ProcessSlot {
    pub(crate) id: ProcessId,
    pub(crate) name: String,
    pub(crate) status: ProcessStatus,
    pub(crate) tags: TagSet,
    /// Taken out while the process is being polled.
    pub(crate) future: Option<LocalBoxFuture<'static, SimulationResult<()>>>,
}

impl fmt::Debug for ProcessSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSlot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("tags", &self.tags)
            .finish()
    }
}

/// What a wait is parked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WaitKind {
    Advance,
    /// A request for `units` of a resource.
    Resource(ResourceId, usize),
    Signals(Vec<SignalId>),
    Queue(QueueId),
    Pause,
}

impl WaitKind {
    /// Time advances run to completion; every other wait can be withdrawn.
    pub(crate) fn is_interruptible(&self) -> bool {
        !matches!(self, WaitKind::Advance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Pending,
    /// Satisfied: timer fired, unit granted, signal turned on, or resumed.
    Ready,
    Interrupted,
}

#[derive(Debug)]
pub(crate) struct WaitState {
    pub(crate) process: ProcessId,
    pub(crate) kind: WaitKind,
    pub(crate) outcome: WaitOutcome,
    /// The queued resume event, if one is in flight.
    pub(crate) event: Option<EventHandle>,
}

/// One entry of a resource's waiting line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiter {
    pub(crate) wait: WaitId,
    pub(crate) process: ProcessId,
    pub(crate) priority: i32,
    pub(crate) units: usize,
    pub(crate) arrival: u64,
}

impl Waiter {
    /// Service order: higher priority first, then earlier arrival.
    fn line_key(&self) -> (Reverse<i32>, u64) {
        (Reverse(self.priority), self.arrival)
    }
}

#[derive(Debug)]
pub(crate) struct ResourceState {
    pub(crate) id: ResourceId,
    pub(crate) name: String,
    pub(crate) capacity: usize,
    /// Last non-zero capacity. Requests larger than this are refused.
    pub(crate) nominal: usize,
    pub(crate) in_use: usize,
    pub(crate) holders: HashMap<ProcessId, usize>,
    /// Ordered by priority descending, then arrival ascending.
    pub(crate) line: Vec<Waiter>,
    pub(crate) next_arrival: u64,
    pub(crate) grants: u64,
}

impl ResourceState {
    pub(crate) fn new(id: ResourceId, name: String, capacity: usize) -> Self {
        Self {
            id,
            name,
            capacity,
            nominal: capacity,
            in_use: 0,
            holders: HashMap::new(),
            line: Vec::new(),
            next_arrival: 0,
            grants: 0,
        }
    }

    /// Whether `units` fit under the capacity right now.
    pub(crate) fn fits(&self, units: usize) -> bool {
        self.in_use + units <= self.capacity
    }

    /// Whether a request at `priority` can be granted without waiting.
    pub(crate) fn can_grant_now(&self, priority: i32, units: usize) -> bool {
        self.fits(units) && self.line.iter().all(|w| w.priority < priority)
    }

    /// The line is served strictly from its head: a large request at the
    /// head holds back smaller ones behind it.
    pub(crate) fn head_fits(&self) -> bool {
        self.line.first().is_some_and(|head| self.fits(head.units))
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if capacity > 0 {
            self.nominal = capacity;
        }
    }

    pub(crate) fn grant(&mut self, process: ProcessId, units: usize) {
        self.in_use += units;
        self.grants += units as u64;
        *self.holders.entry(process).or_insert(0) += units;
    }

    /// Gives back `units` held by `process`. Returns `false`, changing
    /// nothing, if it holds fewer.
    pub(crate) fn ungrant(&mut self, process: ProcessId, units: usize) -> bool {
        match self.holders.get_mut(&process) {
            Some(held) if *held >= units => {
                *held -= units;
                if *held == 0 {
                    self.holders.remove(&process);
                }
                self.in_use = self.in_use.saturating_sub(units);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn enqueue(
        &mut self,
        wait: WaitId,
        process: ProcessId,
        priority: i32,
        units: usize,
    ) {
        let waiter = Waiter {
            wait,
            process,
            priority,
            units,
            arrival: self.next_arrival,
        };
        self.next_arrival += 1;
        let key = waiter.line_key();
        let position = self.line.partition_point(|w| w.line_key() <= key);
        self.line.insert(position, waiter);
    }

    pub(crate) fn remove_waiter(&mut self, wait: WaitId) -> bool {
        let before = self.line.len();
        self.line.retain(|w| w.wait != wait);
        self.line.len() != before
    }
}

#[derive(Debug)]
pub(crate) struct SignalState {
    pub(crate) name: String,
    pub(crate) is_on: bool,
    /// Parked waits, in arrival order.
    pub(crate) waiters: Vec<WaitId>,
}

/// One process parked in a [`QueueState`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueEntry {
    pub(crate) wait: WaitId,
    pub(crate) process: ProcessId,
    pub(crate) order: i64,
    pub(crate) arrival: u64,
}

#[derive(Debug)]
pub(crate) struct QueueState {
    pub(crate) name: String,
    /// Ordered by order token ascending, then arrival ascending.
    pub(crate) entries: Vec<QueueEntry>,
    pub(crate) next_arrival: u64,
}

impl QueueState {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            entries: Vec::new(),
            next_arrival: 0,
        }
    }

    /// Parks `wait` in order. Without an explicit token the arrival number
    /// is used, which gives FIFO order.
    pub(crate) fn join(&mut self, wait: WaitId, process: ProcessId, order: Option<i64>) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        let order = order.unwrap_or(arrival as i64);
        let position = self
            .entries
            .partition_point(|e| (e.order, e.arrival) <= (order, arrival));
        self.entries.insert(
            position,
            QueueEntry {
                wait,
                process,
                order,
                arrival,
            },
        );
    }

    pub(crate) fn remove(&mut self, wait: WaitId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.wait != wait);
        self.entries.len() != before
    }
}

/// Registered waits, ordered by id so bulk operations are deterministic.
pub(crate) type WaitTable = BTreeMap<WaitId, WaitState>;
