//! Event types and the time-ordered queue that holds them.
//!
//! The queue also owns the simulated clock: popping an event is the only way
//! time moves forward.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet},
    fmt,
};

use serde::Serialize;

use crate::{
    error::{SimulationError, SimulationResult},
    process::ProcessId,
    sim::{state::WaitId, world::SimWorld},
    time::SimTime,
};

/// A one-shot callback executed by the kernel when its event pops.
pub type Callback = Box<dyn FnOnce(&SimWorld)>;

/// Events that can be scheduled in the simulation.
pub enum Event {
    /// Resume a process.
    Resume {
        /// The process to resume.
        process: ProcessId,
        /// The wait this resumption satisfies, `None` for the initial start.
        wait: Option<WaitId>,
    },
    /// Run a plain callback against the world.
    Callback(Callback),
    /// Request a graceful stop of the running loop.
    Stop,
}

impl Event {
    /// Short human-readable description, used in pending-event listings.
    pub fn describe(&self) -> String {
        match self {
            Event::Resume {
                process,
                wait: None,
            } => format!("start {process}"),
            Event::Resume {
                process,
                wait: Some(wait),
            } => format!("resume {process} ({wait})"),
            Event::Callback(_) => "callback".to_string(),
            Event::Stop => "stop".to_string(),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Resume { process, wait } => f
                .debug_struct("Resume")
                .field("process", process)
                .field("wait", wait)
                .finish(),
            Event::Callback(_) => f.write_str("Callback(..)"),
            Event::Stop => f.write_str("Stop"),
        }
    }
}

/// Handle to a scheduled event, usable to cancel it.
///
/// Wraps the event's submission sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventHandle(u64);

impl EventHandle {
    /// The submission sequence number of the event.
    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// An event scheduled for execution at a specific simulation time.
#[derive(Debug)]
pub struct ScheduledEvent {
    time: SimTime,
    sequence: u64,
    event: Event,
}

impl ScheduledEvent {
    /// Returns the scheduled execution time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Returns the submission sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns a reference to the event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Consumes the scheduled event and returns the event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, but we want earliest time first
        // So we reverse the time comparison
        match other.time.cmp(&self.time) {
            // Same time: earlier submission first (also reversed for max heap)
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Read-only view of a pending event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEvent {
    /// When the event will fire.
    pub time: SimTime,
    /// Submission sequence number.
    pub sequence: u64,
    /// What the event does.
    pub description: String,
}

/// A priority queue for scheduling events in chronological order, together
/// with the clock it advances.
///
/// Events are processed in time order, with deterministic ordering for events
/// scheduled at the same time using sequence numbers. Cancelled events stay
/// in the heap until they surface and are then discarded.
#[derive(Debug)]
pub struct EventQueue {
    now: SimTime,
    heap: BinaryHeap<ScheduledEvent>,
    next_sequence: u64,
    /// Sequences that were scheduled and are neither popped nor cancelled.
    live: HashSet<u64>,
    cancelled: HashSet<u64>,
}

impl EventQueue {
    /// Creates a new empty event queue with the clock at `start`.
    pub fn new(start: SimTime) -> Self {
        Self {
            now: start,
            heap: BinaryHeap::new(),
            next_sequence: 0,
            live: HashSet::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules an event at an absolute time.
    ///
    /// Fails with [`SimulationError::Causality`] if `time` is before the
    /// clock; the queue is left untouched in that case.
    pub fn schedule(&mut self, time: SimTime, event: Event) -> SimulationResult<EventHandle> {
        if time < self.now {
            return Err(SimulationError::Causality {
                requested: time.as_f64(),
                current: self.now.as_f64(),
            });
        }
        Ok(self.push(time, event))
    }

    /// Schedules an event at the current time, after everything already
    /// queued for this instant.
    pub fn schedule_now(&mut self, event: Event) -> EventHandle {
        self.push(self.now, event)
    }

    fn push(&mut self, time: SimTime, event: Event) -> EventHandle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.live.insert(sequence);
        self.heap.push(ScheduledEvent {
            time,
            sequence,
            event,
        });
        EventHandle(sequence)
    }

    /// Marks an event inert. Returns `false` if it already fired or was
    /// already cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if !self.live.remove(&handle.0) {
            return false;
        }
        self.cancelled.insert(handle.0);
        self.purge_cancelled_head();
        true
    }

    /// Removes the earliest live event and advances the clock to its time.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent> {
        while let Some(scheduled) = self.heap.pop() {
            if self.cancelled.remove(&scheduled.sequence) {
                continue;
            }
            self.live.remove(&scheduled.sequence);
            self.now = scheduled.time;
            self.purge_cancelled_head();
            return Some(scheduled);
        }
        None
    }

    /// Time of the earliest live event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(ScheduledEvent::time)
    }

    /// Returns `true` if no live event remains.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns the number of live events.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Live events in the order they will pop.
    pub fn pending(&self) -> Vec<PendingEvent> {
        let mut events: Vec<&ScheduledEvent> = self
            .heap
            .iter()
            .filter(|e| self.live.contains(&e.sequence))
            .collect();
        // Reverse ordering puts the earliest last; sort descending instead.
        events.sort_by(|a, b| b.cmp(a));
        events
            .into_iter()
            .map(|e| PendingEvent {
                time: e.time,
                sequence: e.sequence,
                description: e.event.describe(),
            })
            .collect()
    }

    /// Keeps the heap head live so `peek_time` never reports a dead event.
    fn purge_cancelled_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if !self.cancelled.contains(&head.sequence) {
                break;
            }
            let sequence = head.sequence;
            self.heap.pop();
            self.cancelled.remove(&sequence);
        }
    }
}
