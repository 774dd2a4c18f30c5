//! The simulation world: event loop, process table and the kernel side of
//! every suspension primitive.

use std::{
    any::Any,
    cell::RefCell,
    future::Future,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
    task::{Context, Poll},
};

use futures::{FutureExt, task::noop_waker_ref};
use serde::Serialize;
use tracing::{debug, debug_span, instrument, trace, warn};

use crate::{
    config::SimulationConfig,
    error::{SimulationError, SimulationResult},
    process::{ProcessContext, ProcessId, ProcessSnapshot, ProcessStatus},
    queue::{Queue, QueueId},
    resource::{Resource, ResourceId, ResourceSnapshot},
    selector::Selector,
    signal::{Signal, SignalId},
    sim::{
        events::{Event, EventHandle, EventQueue, PendingEvent},
        state::{
            ProcessSlot, QueueState, ResourceState, SignalState, WaitId, WaitKind, WaitOutcome,
            WaitState, WaitTable,
        },
    },
    tags::TagSet,
    time::SimTime,
};

/// Lifecycle of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Never run.
    Idle,
    /// Inside `run`.
    Running,
    /// Returned early: stop requested, horizon reached or an actor faulted.
    /// Unprocessed events are kept and a later `run` continues from them.
    Stopped,
    /// Returned because the queue was empty.
    Drained,
}

/// Counters collected while the world runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationMetrics {
    /// Clock value when the metrics were extracted.
    pub current_time: SimTime,
    /// Events popped from the queue, including stale resumptions.
    pub events_processed: u64,
    /// Times a process behavior was polled.
    pub resumptions: u64,
    /// Processes created.
    pub processes_spawned: u64,
    /// Processes that finished, normally or by fault.
    pub processes_terminated: u64,
    /// Processes that ended with an error or panic.
    pub faults: u64,
}

/// Result of registering a signal wait.
pub(crate) enum SignalWait {
    /// At least one signal was already on.
    Ready(Vec<usize>),
    Parked(WaitId),
}

#[derive(Debug)]
pub(crate) struct SimInner {
    queue: EventQueue,
    processes: Vec<ProcessSlot>,
    waits: WaitTable,
    next_wait: u64,
    resources: Vec<ResourceState>,
    signals: Vec<SignalState>,
    queues: Vec<QueueState>,
    run_state: RunState,
    stop_requested: bool,
    dispatching: bool,
    current: Option<ProcessId>,
    config: SimulationConfig,
    metrics: SimulationMetrics,
}

impl SimInner {
    fn new(config: SimulationConfig, start: SimTime) -> Self {
        Self {
            queue: EventQueue::new(start),
            processes: Vec::new(),
            waits: WaitTable::new(),
            next_wait: 0,
            resources: Vec::new(),
            signals: Vec::new(),
            queues: Vec::new(),
            run_state: RunState::Idle,
            stop_requested: false,
            dispatching: false,
            current: None,
            config,
            metrics: SimulationMetrics::default(),
        }
    }

    fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Suspension primitives may only be used by the process being resumed.
    fn ensure_current(&self, process: ProcessId) -> SimulationResult<()> {
        if self.current == Some(process) {
            Ok(())
        } else {
            Err(SimulationError::InvalidState(format!(
                "{process} can only suspend from inside its own behavior"
            )))
        }
    }

    fn slot(&self, process: ProcessId) -> SimulationResult<&ProcessSlot> {
        self.processes
            .get(process.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown process {process}")))
    }

    fn slot_mut(&mut self, process: ProcessId) -> SimulationResult<&mut ProcessSlot> {
        self.processes
            .get_mut(process.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown process {process}")))
    }

    fn resource(&self, id: ResourceId) -> SimulationResult<&ResourceState> {
        self.resources
            .get(id.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown resource {id}")))
    }

    fn resource_mut(&mut self, id: ResourceId) -> SimulationResult<&mut ResourceState> {
        self.resources
            .get_mut(id.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown resource {id}")))
    }

    fn signal_mut(&mut self, id: SignalId) -> SimulationResult<&mut SignalState> {
        self.signals
            .get_mut(id.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown signal {id}")))
    }

    fn queue_state(&self, id: QueueId) -> SimulationResult<&QueueState> {
        self.queues
            .get(id.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown queue {id}")))
    }

    fn queue_state_mut(&mut self, id: QueueId) -> SimulationResult<&mut QueueState> {
        self.queues
            .get_mut(id.index())
            .ok_or_else(|| SimulationError::InvalidState(format!("unknown queue {id}")))
    }

    fn tags_mut(&mut self, process: ProcessId) -> SimulationResult<&mut TagSet> {
        let slot = self.slot_mut(process)?;
        if slot.status == ProcessStatus::Terminated {
            return Err(SimulationError::TagsFrozen { process });
        }
        Ok(&mut slot.tags)
    }

    fn register_wait(&mut self, process: ProcessId, kind: WaitKind) -> WaitId {
        let wait = WaitId::new(self.next_wait);
        self.next_wait += 1;
        self.waits.insert(
            wait,
            WaitState {
                process,
                kind,
                outcome: WaitOutcome::Pending,
                event: None,
            },
        );
        wait
    }

    /// Settles a wait and queues its process at the current instant.
    fn wake(&mut self, wait: WaitId, outcome: WaitOutcome) {
        let Some(state) = self.waits.get_mut(&wait) else {
            return;
        };
        state.outcome = outcome;
        let process = state.process;
        if let Some(previous) = state.event.take() {
            self.queue.cancel(previous);
        }
        let handle = self.queue.schedule_now(Event::Resume {
            process,
            wait: Some(wait),
        });
        if let Some(state) = self.waits.get_mut(&wait) {
            state.event = Some(handle);
        }
    }

    /// Takes a pending wait off whatever line or signal list it sits on.
    fn detach(&mut self, wait: WaitId, kind: &WaitKind) {
        match kind {
            WaitKind::Resource(id, _) => {
                if let Some(res) = self.resources.get_mut(id.index()) {
                    res.remove_waiter(wait);
                }
            }
            WaitKind::Queue(id) => {
                if let Some(queue) = self.queues.get_mut(id.index()) {
                    queue.remove(wait);
                }
            }
            WaitKind::Signals(ids) => {
                for id in ids {
                    if let Some(signal) = self.signals.get_mut(id.index()) {
                        signal.waiters.retain(|w| *w != wait);
                    }
                }
            }
            WaitKind::Advance | WaitKind::Pause => {}
        }
    }

    /// Hands free units to the head of the line, all at the current instant.
    fn promote_waiters(&mut self, id: ResourceId) {
        loop {
            let Some(res) = self.resources.get_mut(id.index()) else {
                return;
            };
            if !res.head_fits() {
                return;
            }
            let waiter = res.line.remove(0);
            res.grant(waiter.process, waiter.units);
            debug!(
                resource = %id,
                process = %waiter.process,
                priority = waiter.priority,
                units = waiter.units,
                "granted units to waiter"
            );
            self.wake(waiter.wait, WaitOutcome::Ready);
        }
    }

    /// Forgets a wait whose future went away.
    fn withdraw_wait(&mut self, wait: WaitId) {
        let Some(state) = self.waits.remove(&wait) else {
            return;
        };
        if let Some(handle) = state.event {
            self.queue.cancel(handle);
        }
        match (&state.kind, state.outcome) {
            (WaitKind::Resource(id, units), WaitOutcome::Ready) => {
                // Granted but never observed: the units move on.
                let id = *id;
                if let Some(res) = self.resources.get_mut(id.index()) {
                    res.ungrant(state.process, *units);
                }
                trace!(resource = %id, process = %state.process, "returned unclaimed grant");
                self.promote_waiters(id);
            }
            (kind, WaitOutcome::Pending) => self.detach(wait, kind),
            _ => {}
        }
    }

    /// Consumes a settled wait. `None` while it is still pending.
    fn take_outcome(&mut self, wait: WaitId) -> Option<SimulationResult<()>> {
        let Some(state) = self.waits.get(&wait) else {
            return Some(Err(SimulationError::InvalidState(format!(
                "{wait} is not registered"
            ))));
        };
        let process = state.process;
        let outcome = state.outcome;
        if outcome == WaitOutcome::Pending {
            return None;
        }
        if let Some(handle) = self.waits.remove(&wait).and_then(|state| state.event) {
            self.queue.cancel(handle);
        }
        Some(match outcome {
            WaitOutcome::Interrupted => Err(SimulationError::Interrupted { process }),
            _ => Ok(()),
        })
    }

    fn signals_on(&self, signals: &[SignalId]) -> Vec<usize> {
        signals
            .iter()
            .enumerate()
            .filter(|(_, id)| self.signals.get(id.index()).is_some_and(|s| s.is_on))
            .map(|(index, _)| index)
            .collect()
    }

    /// Waits of `process` that are still pending and match `filter`.
    fn pending_waits_of(
        &self,
        process: ProcessId,
        filter: impl Fn(&WaitKind) -> bool,
    ) -> Vec<(WaitId, WaitKind)> {
        self.waits
            .iter()
            .filter(|(_, s)| {
                s.process == process && s.outcome == WaitOutcome::Pending && filter(&s.kind)
            })
            .map(|(id, s)| (*id, s.kind.clone()))
            .collect()
    }

    /// Gives back every unit a finished process still holds.
    fn reclaim_units(&mut self, process: ProcessId) {
        for index in 0..self.resources.len() {
            let res = &mut self.resources[index];
            let Some(held) = res.holders.remove(&process) else {
                continue;
            };
            res.in_use = res.in_use.saturating_sub(held);
            let id = res.id;
            warn!(
                %process,
                resource = %id,
                units = held,
                "process finished while holding units; reclaiming"
            );
            self.promote_waiters(id);
        }
    }
}

/// Resets the dispatch markers when a resumption or callback returns or
/// unwinds.
struct DispatchGuard<'a> {
    inner: &'a RefCell<SimInner>,
}

impl<'a> DispatchGuard<'a> {
    fn enter(inner: &'a RefCell<SimInner>, process: Option<ProcessId>) -> Self {
        {
            let mut state = inner.borrow_mut();
            state.dispatching = true;
            state.current = process;
        }
        Self { inner }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.dispatching = false;
            state.current = None;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// The central simulation coordinator that manages time and event processing.
///
/// `SimWorld` owns all mutable simulation state and provides the main interface
/// for spawning processes, scheduling events and advancing simulation time. It
/// uses a centralized ownership model with handle-based access: process
/// contexts and resource or signal handles hold a [`WeakSimWorld`] and go
/// through it for every operation.
///
/// Everything runs on one thread. Process behaviors are futures polled by the
/// world itself when their resume event pops, so no external executor is
/// needed.
#[derive(Debug)]
pub struct SimWorld {
    inner: Rc<RefCell<SimInner>>,
}

impl SimWorld {
    /// Creates a new simulation world with the clock at zero.
    pub fn new() -> Self {
        Self::from_parts(SimulationConfig::default(), SimTime::ZERO)
    }

    /// Creates a new simulation world from a configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use moonpool_des::{SimWorld, SimulationConfig};
    ///
    /// let sim = SimWorld::with_config(SimulationConfig {
    ///     start_time: 8.0,
    ///     ..Default::default()
    /// })
    /// .unwrap();
    /// assert_eq!(sim.now(), 8.0);
    /// ```
    pub fn with_config(config: SimulationConfig) -> SimulationResult<Self> {
        let start = config.validate()?;
        Ok(Self::from_parts(config, start))
    }

    fn from_parts(config: SimulationConfig, start: SimTime) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimInner::new(config, start))),
        }
    }

    /// Creates a weak reference to this simulation world.
    pub fn downgrade(&self) -> WeakSimWorld {
        WeakSimWorld {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimTime {
        self.inner.borrow().now()
    }

    /// The configuration this world was built with.
    pub fn config(&self) -> SimulationConfig {
        self.inner.borrow().config.clone()
    }

    /// Current state of the run loop.
    pub fn run_state(&self) -> RunState {
        self.inner.borrow().run_state
    }

    /// Returns `true` if there are events waiting to be processed.
    pub fn has_pending_events(&self) -> bool {
        !self.inner.borrow().queue.is_empty()
    }

    /// Returns the number of events waiting to be processed.
    pub fn pending_event_count(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Lists the live events in the order they will fire.
    pub fn pending_events(&self) -> Vec<PendingEvent> {
        self.inner.borrow().queue.pending()
    }

    /// Extract the counters collected so far.
    pub fn extract_metrics(&self) -> SimulationMetrics {
        let inner = self.inner.borrow();
        SimulationMetrics {
            current_time: inner.now(),
            ..inner.metrics.clone()
        }
    }

    /// Processes events until the queue drains, a stop is requested, the
    /// configured horizon is reached, or an actor faults.
    ///
    /// A stop requested while the world was not running is discarded when
    /// the run starts. After an early return the remaining events stay
    /// queued and a later call continues from them.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> SimulationResult<RunState> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.dispatching {
                return Err(SimulationError::InvalidState(
                    "run cannot be called from inside a running process or callback".into(),
                ));
            }
            inner.run_state = RunState::Running;
            inner.stop_requested = false;
            debug!(now = %inner.now(), pending = inner.queue.len(), "run loop started");
        }

        loop {
            {
                let mut inner = self.inner.borrow_mut();
                if inner.stop_requested {
                    inner.stop_requested = false;
                    inner.run_state = RunState::Stopped;
                    debug!(now = %inner.now(), pending = inner.queue.len(), "run loop stopped");
                    return Ok(RunState::Stopped);
                }
                if inner.queue.is_empty() {
                    inner.run_state = RunState::Drained;
                    debug!(now = %inner.now(), "event queue drained");
                    return Ok(RunState::Drained);
                }
                if let (Some(horizon), Some(next)) =
                    (inner.config.horizon_time(), inner.queue.peek_time())
                {
                    if next > horizon {
                        inner.run_state = RunState::Stopped;
                        debug!(%horizon, %next, "horizon reached");
                        return Ok(RunState::Stopped);
                    }
                }
            }

            if let Err(err) = self.dispatch_next() {
                let mut inner = self.inner.borrow_mut();
                inner.run_state = RunState::Stopped;
                inner.stop_requested = false;
                return Err(err);
            }
        }
    }

    /// Runs for `duration` units of simulated time past the current clock.
    ///
    /// The stop marker scheduled for this is withdrawn before returning, so
    /// it never fires in a later run.
    pub fn run_for(&mut self, duration: f64) -> SimulationResult<RunState> {
        let marker = {
            let mut inner = self.inner.borrow_mut();
            let at = inner
                .now()
                .after(duration)
                .ok_or(SimulationError::InvalidDuration(duration))?;
            inner.queue.schedule(at, Event::Stop)?
        };
        let result = self.run();
        self.inner.borrow_mut().queue.cancel(marker);
        result
    }

    /// Processes the next scheduled event and advances time.
    ///
    /// Returns `Ok(true)` if more events are available for processing. Stop
    /// requests and the horizon are only honoured by [`SimWorld::run`].
    #[instrument(skip(self))]
    pub fn step(&mut self) -> SimulationResult<bool> {
        if self.inner.borrow().dispatching {
            return Err(SimulationError::InvalidState(
                "step cannot be called from inside a running process or callback".into(),
            ));
        }
        self.dispatch_next()?;
        Ok(self.has_pending_events())
    }

    /// Asks the run loop to return after the event being processed.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop_requested = true;
    }

    /// Schedules `callback` to run `delay` units from now.
    pub fn schedule_in(
        &self,
        delay: f64,
        callback: impl FnOnce(&SimWorld) + 'static,
    ) -> SimulationResult<EventHandle> {
        let mut inner = self.inner.borrow_mut();
        let at = inner
            .now()
            .after(delay)
            .ok_or(SimulationError::InvalidDuration(delay))?;
        inner.queue.schedule(at, Event::Callback(Box::new(callback)))
    }

    /// Schedules `callback` at the absolute time `time`.
    pub fn schedule_at(
        &self,
        time: f64,
        callback: impl FnOnce(&SimWorld) + 'static,
    ) -> SimulationResult<EventHandle> {
        let mut inner = self.inner.borrow_mut();
        let at = Self::absolute_time_with_inner(&inner, time)?;
        inner.queue.schedule(at, Event::Callback(Box::new(callback)))
    }

    /// Cancels a pending event. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&self, handle: EventHandle) -> bool {
        self.inner.borrow_mut().queue.cancel(handle)
    }

    fn absolute_time_with_inner(inner: &SimInner, time: f64) -> SimulationResult<SimTime> {
        if !time.is_finite() {
            return Err(SimulationError::InvalidTime(time));
        }
        match SimTime::from_f64(time) {
            Some(at) if at >= inner.now() => Ok(at),
            _ => Err(SimulationError::Causality {
                requested: time,
                current: inner.now().as_f64(),
            }),
        }
    }

    /// Spawns a process that starts at the current instant, after everything
    /// already queued for it.
    ///
    /// The behavior receives the process's [`ProcessContext`] and returns the
    /// future the world drives. An `Err` or a panic escaping it terminates the
    /// process and makes [`SimWorld::run`] return
    /// [`SimulationError::ActorFault`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use moonpool_des::SimWorld;
    ///
    /// let mut sim = SimWorld::new();
    /// sim.spawn("clerk", |ctx| async move {
    ///     ctx.advance(5.0).await?;
    ///     Ok(())
    /// })
    /// .unwrap();
    /// sim.run().unwrap();
    /// assert_eq!(sim.now(), 5.0);
    /// ```
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, behavior: F) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let now = self.now();
        self.spawn_process(name.into(), TagSet::new(), now, behavior)
    }

    /// Spawns a process whose first step runs `delay` units from now.
    pub fn spawn_in<F, Fut>(
        &self,
        delay: f64,
        name: impl Into<String>,
        behavior: F,
    ) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let start = self
            .now()
            .after(delay)
            .ok_or(SimulationError::InvalidDuration(delay))?;
        self.spawn_process(name.into(), TagSet::new(), start, behavior)
    }

    /// Spawns a process whose first step runs at the absolute time `time`.
    pub fn spawn_at<F, Fut>(
        &self,
        time: f64,
        name: impl Into<String>,
        behavior: F,
    ) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let start = Self::absolute_time_with_inner(&self.inner.borrow(), time)?;
        self.spawn_process(name.into(), TagSet::new(), start, behavior)
    }

    /// Spawns a process at the current instant with a seeded tag set.
    pub fn spawn_with_tags<F, Fut>(
        &self,
        name: impl Into<String>,
        tags: TagSet,
        behavior: F,
    ) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let now = self.now();
        self.spawn_process(name.into(), tags, now, behavior)
    }

    /// Spawns a driver process that waits for each interval in turn and then
    /// spawns a fresh process from `factory`.
    ///
    /// Generated processes are named `"{name}#{n}"`, counting from zero. The
    /// driver terminates once `intervals` is exhausted.
    pub fn spawn_recurring<I, G, Fut>(
        &self,
        name: impl Into<String>,
        intervals: I,
        mut factory: G,
    ) -> SimulationResult<ProcessId>
    where
        I: IntoIterator<Item = f64>,
        I::IntoIter: 'static,
        G: FnMut(ProcessContext) -> Fut + 'static,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let name = name.into();
        let intervals = intervals.into_iter();
        let driver_name = name.clone();
        self.spawn(driver_name, move |ctx| async move {
            for (n, interval) in intervals.enumerate() {
                ctx.advance(interval).await?;
                ctx.spawn(format!("{name}#{n}"), &mut factory)?;
            }
            Ok(())
        })
    }

    pub(crate) fn spawn_process<F, Fut>(
        &self,
        name: String,
        tags: TagSet,
        start: SimTime,
        behavior: F,
    ) -> SimulationResult<ProcessId>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = SimulationResult<()>> + 'static,
    {
        let id = {
            let mut inner = self.inner.borrow_mut();
            if start < inner.now() {
                return Err(SimulationError::Causality {
                    requested: start.as_f64(),
                    current: inner.now().as_f64(),
                });
            }
            let id = ProcessId::new(inner.processes.len());
            inner.processes.push(ProcessSlot {
                id,
                name: name.clone(),
                status: ProcessStatus::Pending,
                tags,
                future: None,
            });
            id
        };

        // The behavior may touch the world, so no borrow is held here.
        let future = behavior(ProcessContext::new(self.downgrade(), id)).boxed_local();

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.slot_mut(id)?.future = Some(future);
        inner.queue.schedule(
            start,
            Event::Resume {
                process: id,
                wait: None,
            },
        )?;
        inner.metrics.processes_spawned += 1;
        debug!(process = %id, %name, %start, "spawned process");
        Ok(id)
    }

    /// Status of a process, `None` for an unknown id.
    pub fn process_status(&self, process: ProcessId) -> Option<ProcessStatus> {
        self.inner.borrow().slot(process).ok().map(|slot| slot.status)
    }

    /// Name of a process.
    pub fn process_name(&self, process: ProcessId) -> Option<String> {
        self.inner
            .borrow()
            .slot(process)
            .ok()
            .map(|slot| slot.name.clone())
    }

    /// A copy of a process's tags.
    pub fn process_tags(&self, process: ProcessId) -> Option<TagSet> {
        self.inner
            .borrow()
            .slot(process)
            .ok()
            .map(|slot| slot.tags.clone())
    }

    /// Read-only view of a process.
    pub fn process_snapshot(&self, process: ProcessId) -> Option<ProcessSnapshot> {
        self.inner
            .borrow()
            .slot(process)
            .ok()
            .map(|slot| ProcessSnapshot {
                id: slot.id,
                name: slot.name.clone(),
                status: slot.status,
                tags: slot.tags.clone(),
            })
    }

    /// Number of processes that have not terminated.
    pub fn live_process_count(&self) -> usize {
        self.inner
            .borrow()
            .processes
            .iter()
            .filter(|slot| slot.status != ProcessStatus::Terminated)
            .count()
    }

    /// Withdraws every interruptible wait of `process`: resource requests,
    /// signal waits, queue places and pauses. Each affected wait resolves with
    /// [`SimulationError::Interrupted`] at the current instant.
    ///
    /// Returns `false` when nothing was withdrawn: the process is running,
    /// advancing time, already interrupted, or about to resume from a grant
    /// or signal that happened first.
    pub fn interrupt(&self, process: ProcessId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let targets = inner.pending_waits_of(process, WaitKind::is_interruptible);
        for (wait, kind) in &targets {
            inner.detach(*wait, kind);
            inner.wake(*wait, WaitOutcome::Interrupted);
        }
        if !targets.is_empty() {
            debug!(%process, waits = targets.len(), "interrupted process");
        }
        !targets.is_empty()
    }

    /// Wakes a process suspended in [`ProcessContext::pause`]. Returns
    /// `false` if it was not paused.
    pub fn resume(&self, process: ProcessId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let targets = inner.pending_waits_of(process, |kind| *kind == WaitKind::Pause);
        for (wait, _) in &targets {
            inner.wake(*wait, WaitOutcome::Ready);
        }
        if !targets.is_empty() {
            debug!(%process, "resumed paused process");
        }
        !targets.is_empty()
    }

    /// Creates a resource with `capacity` identical units.
    pub fn create_resource(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> SimulationResult<Resource> {
        let name = name.into();
        if capacity == 0 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "resource {name} needs a capacity of at least one"
            )));
        }
        let mut inner = self.inner.borrow_mut();
        let id = ResourceId::new(inner.resources.len());
        debug!(resource = %id, %name, capacity, "created resource");
        inner
            .resources
            .push(ResourceState::new(id, name, capacity));
        Ok(Resource::new(id, self.downgrade()))
    }

    /// Creates a boolean signal in the given initial state.
    pub fn create_signal(&self, name: impl Into<String>, on: bool) -> Signal {
        let mut inner = self.inner.borrow_mut();
        let id = SignalId::new(inner.signals.len());
        inner.signals.push(SignalState {
            name: name.into(),
            is_on: on,
            waiters: Vec::new(),
        });
        Signal::new(id, self.downgrade())
    }

    /// Creates an empty queue processes can park in until popped.
    pub fn create_queue(&self, name: impl Into<String>) -> Queue {
        let mut inner = self.inner.borrow_mut();
        let id = QueueId::new(inner.queues.len());
        inner.queues.push(QueueState::new(name.into()));
        Queue::new(id, self.downgrade())
    }

    /// Asks `selector` to pick one of `candidates`.
    ///
    /// The selector sees a snapshot of each candidate, in the given order.
    /// A choice outside the candidate list counts as no choice.
    pub fn select_resource<S>(
        &self,
        selector: &S,
        candidates: &[Resource],
    ) -> SimulationResult<Option<Resource>>
    where
        S: Selector + ?Sized,
    {
        let snapshots = candidates
            .iter()
            .map(|candidate| self.resource_snapshot(candidate.id()))
            .collect::<SimulationResult<Vec<_>>>()?;
        let chosen = selector.choose(&snapshots);
        trace!(?chosen, candidates = candidates.len(), "selector decided");
        Ok(chosen.and_then(|id| candidates.iter().find(|c| c.id() == id).cloned()))
    }

    fn dispatch_next(&self) -> SimulationResult<bool> {
        let scheduled = {
            let mut inner = self.inner.borrow_mut();
            let Some(scheduled) = inner.queue.pop_next() else {
                return Ok(false);
            };
            inner.metrics.events_processed += 1;
            scheduled
        };
        trace!(
            time = %scheduled.time(),
            sequence = scheduled.sequence(),
            event = ?scheduled.event(),
            "processing event"
        );

        match scheduled.into_event() {
            Event::Resume { process, wait } => self.resume_process(process, wait)?,
            Event::Callback(callback) => {
                let _guard = DispatchGuard::enter(&self.inner, None);
                callback(self);
            }
            Event::Stop => self.stop(),
        }
        Ok(true)
    }

    fn resume_process(&self, process: ProcessId, wait: Option<WaitId>) -> SimulationResult<()> {
        let (mut future, name, now, catch_panics) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            if let Some(wait) = wait {
                let Some(state) = inner.waits.get_mut(&wait) else {
                    trace!(%process, %wait, "discarding resumption of a withdrawn wait");
                    return Ok(());
                };
                state.event = None;
                if state.kind == WaitKind::Advance && state.outcome == WaitOutcome::Pending {
                    state.outcome = WaitOutcome::Ready;
                }
            }

            let now = inner.now();
            let catch_panics = inner.config.catch_panics;
            let slot = inner.slot_mut(process)?;
            if slot.status == ProcessStatus::Terminated {
                trace!(%process, "discarding resumption of a terminated process");
                return Ok(());
            }
            let Some(future) = slot.future.take() else {
                return Err(SimulationError::InvalidState(format!(
                    "{process} is already being resumed"
                )));
            };
            slot.status = ProcessStatus::Running;
            let name = slot.name.clone();
            inner.metrics.resumptions += 1;
            (future, name, now, catch_panics)
        };

        let polled = {
            let _dispatch = DispatchGuard::enter(&self.inner, Some(process));
            let span = debug_span!("process", id = %process, name = %name, sim_time = now.as_f64());
            let _entered = span.enter();
            let mut cx = Context::from_waker(noop_waker_ref());
            if catch_panics {
                panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
                    .map_err(panic_message)
            } else {
                Ok(future.as_mut().poll(&mut cx))
            }
        };

        let message = match polled {
            Ok(Poll::Pending) => {
                let mut inner = self.inner.borrow_mut();
                let slot = inner.slot_mut(process)?;
                slot.future = Some(future);
                slot.status = ProcessStatus::Suspended;
                return Ok(());
            }
            Ok(Poll::Ready(Ok(()))) => {
                // Dropping the behavior may run wait destructors that borrow
                // the world.
                drop(future);
                self.terminate(process, false);
                debug!(%process, %name, "process finished");
                return Ok(());
            }
            Ok(Poll::Ready(Err(err))) => err.to_string(),
            Err(panic) => panic,
        };

        drop(future);
        self.terminate(process, true);
        warn!(%process, %name, %message, "process faulted");
        Err(SimulationError::ActorFault {
            process,
            name,
            message,
        })
    }

    fn terminate(&self, process: ProcessId, faulted: bool) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        if let Ok(slot) = inner.slot_mut(process) {
            slot.status = ProcessStatus::Terminated;
            slot.future = None;
        }
        inner.metrics.processes_terminated += 1;
        if faulted {
            inner.metrics.faults += 1;
        }
        let leftovers: Vec<WaitId> = inner
            .waits
            .iter()
            .filter(|(_, state)| state.process == process)
            .map(|(wait, _)| *wait)
            .collect();
        for wait in leftovers {
            inner.withdraw_wait(wait);
        }
        inner.reclaim_units(process);
    }

    // Kernel side of the process primitives. Each call borrows the world only
    // for its own duration.

    pub(crate) fn begin_advance(&self, process: ProcessId, delay: f64) -> SimulationResult<WaitId> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.ensure_current(process)?;
        let at = inner
            .now()
            .after(delay)
            .ok_or(SimulationError::InvalidDuration(delay))?;
        let wait = inner.register_wait(process, WaitKind::Advance);
        let handle = inner.queue.schedule(
            at,
            Event::Resume {
                process,
                wait: Some(wait),
            },
        )?;
        if let Some(state) = inner.waits.get_mut(&wait) {
            state.event = Some(handle);
        }
        trace!(%process, %wait, until = %at, "advancing");
        Ok(wait)
    }

    /// Grants `units` immediately (`None`) or parks the process in line.
    pub(crate) fn begin_acquire(
        &self,
        process: ProcessId,
        resource: ResourceId,
        units: usize,
        priority: i32,
    ) -> SimulationResult<Option<WaitId>> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.ensure_current(process)?;
        let res = inner.resource_mut(resource)?;
        if units == 0 || units > res.nominal {
            return Err(SimulationError::ResourceMisuse {
                resource,
                reason: format!(
                    "{process} requested {units} units; requests must be between 1 and {}",
                    res.nominal
                ),
            });
        }
        if res.can_grant_now(priority, units) {
            res.grant(process, units);
            debug!(%resource, %process, priority, units, "granted units immediately");
            return Ok(None);
        }
        let wait = inner.register_wait(process, WaitKind::Resource(resource, units));
        inner
            .resource_mut(resource)?
            .enqueue(wait, process, priority, units);
        debug!(%resource, %process, priority, units, %wait, "queued for resource");
        Ok(Some(wait))
    }

    pub(crate) fn release(
        &self,
        process: ProcessId,
        resource: ResourceId,
        units: usize,
    ) -> SimulationResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_current(process)?;
        let res = inner.resource_mut(resource)?;
        let held = res.holders.get(&process).copied().unwrap_or(0);
        if units == 0 || !res.ungrant(process, units) {
            return Err(SimulationError::ResourceMisuse {
                resource,
                reason: format!(
                    "{process} released {units} units but does not hold them ({held} held)"
                ),
            });
        }
        debug!(%resource, %process, units, "released units");
        inner.promote_waiters(resource);
        Ok(())
    }

    /// Returns units on behalf of a hold dropped without an explicit
    /// release. Units already reclaimed at termination are not returned
    /// twice.
    pub(crate) fn return_units(&self, process: ProcessId, resource: ResourceId, units: usize) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            return;
        };
        let Ok(res) = inner.resource_mut(resource) else {
            return;
        };
        if res.ungrant(process, units) {
            trace!(%resource, %process, units, "hold dropped; units returned");
            inner.promote_waiters(resource);
        }
    }

    pub(crate) fn begin_join(
        &self,
        process: ProcessId,
        queue: QueueId,
        order: Option<i64>,
    ) -> SimulationResult<WaitId> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.ensure_current(process)?;
        inner.queue_state(queue)?;
        let wait = inner.register_wait(process, WaitKind::Queue(queue));
        inner.queue_state_mut(queue)?.join(wait, process, order);
        debug!(%queue, %process, ?order, %wait, "joined queue");
        Ok(wait)
    }

    /// Removes the head of a queue and resumes it at the current instant.
    pub(crate) fn queue_pop(&self, id: QueueId) -> SimulationResult<Option<ProcessId>> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let queue = inner.queue_state_mut(id)?;
        if queue.entries.is_empty() {
            return Ok(None);
        }
        let entry = queue.entries.remove(0);
        inner.wake(entry.wait, WaitOutcome::Ready);
        debug!(queue = %id, process = %entry.process, "popped queue head");
        Ok(Some(entry.process))
    }

    pub(crate) fn queue_name(&self, id: QueueId) -> SimulationResult<String> {
        Ok(self.inner.borrow().queue_state(id)?.name.clone())
    }

    pub(crate) fn queue_waiters(&self, id: QueueId) -> SimulationResult<Vec<ProcessId>> {
        Ok(self
            .inner
            .borrow()
            .queue_state(id)?
            .entries
            .iter()
            .map(|entry| entry.process)
            .collect())
    }

    pub(crate) fn begin_select(
        &self,
        process: ProcessId,
        signals: &[SignalId],
    ) -> SimulationResult<SignalWait> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.ensure_current(process)?;
        if signals.is_empty() {
            return Err(SimulationError::InvalidState(
                "cannot wait on an empty set of signals".into(),
            ));
        }
        for id in signals {
            inner.signal_mut(*id)?;
        }
        let on = inner.signals_on(signals);
        if !on.is_empty() {
            return Ok(SignalWait::Ready(on));
        }
        let wait = inner.register_wait(process, WaitKind::Signals(signals.to_vec()));
        for id in signals {
            inner.signal_mut(*id)?.waiters.push(wait);
        }
        trace!(%process, %wait, signals = signals.len(), "waiting on signals");
        Ok(SignalWait::Parked(wait))
    }

    /// Settles a signal wait, re-parking it if every signal went off again
    /// before the process ran.
    pub(crate) fn settle_signal_wait(
        &self,
        wait: WaitId,
        signals: &[SignalId],
    ) -> Option<SimulationResult<Vec<usize>>> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let outcome = match inner.waits.get(&wait) {
            Some(state) => state.outcome,
            None => {
                return Some(Err(SimulationError::InvalidState(format!(
                    "{wait} is not registered"
                ))));
            }
        };
        if outcome != WaitOutcome::Ready {
            return inner
                .take_outcome(wait)
                .map(|result| result.map(|()| Vec::new()));
        }

        let on = inner.signals_on(signals);
        if on.is_empty() {
            if let Some(state) = inner.waits.get_mut(&wait) {
                state.outcome = WaitOutcome::Pending;
                if let Some(handle) = state.event.take() {
                    inner.queue.cancel(handle);
                }
            }
            for id in signals {
                if let Some(signal) = inner.signals.get_mut(id.index()) {
                    signal.waiters.push(wait);
                }
            }
            trace!(%wait, "signals went off again; waiting");
            return None;
        }
        inner
            .take_outcome(wait)
            .map(|result| result.map(|()| on))
    }

    pub(crate) fn begin_pause(&self, process: ProcessId) -> SimulationResult<WaitId> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_current(process)?;
        let wait = inner.register_wait(process, WaitKind::Pause);
        debug!(%process, %wait, "paused");
        Ok(wait)
    }

    pub(crate) fn take_wait_outcome(&self, wait: WaitId) -> Option<SimulationResult<()>> {
        self.inner.borrow_mut().take_outcome(wait)
    }

    pub(crate) fn withdraw_wait(&self, wait: WaitId) {
        // A destructor running while the world is mid-update has nothing to
        // withdraw from yet.
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.withdraw_wait(wait);
        }
    }

    pub(crate) fn with_tags<R>(
        &self,
        process: ProcessId,
        f: impl FnOnce(&TagSet) -> R,
    ) -> SimulationResult<R> {
        Ok(f(&self.inner.borrow().slot(process)?.tags))
    }

    pub(crate) fn with_tags_mut<R>(
        &self,
        process: ProcessId,
        f: impl FnOnce(&mut TagSet) -> R,
    ) -> SimulationResult<R> {
        Ok(f(self.inner.borrow_mut().tags_mut(process)?))
    }

    pub(crate) fn resource_snapshot(&self, id: ResourceId) -> SimulationResult<ResourceSnapshot> {
        self.inner.borrow().resource(id).map(ResourceSnapshot::from_state)
    }

    pub(crate) fn resource_holds(
        &self,
        id: ResourceId,
        process: ProcessId,
    ) -> SimulationResult<usize> {
        Ok(self
            .inner
            .borrow()
            .resource(id)?
            .holders
            .get(&process)
            .copied()
            .unwrap_or(0))
    }

    pub(crate) fn resource_waiters(&self, id: ResourceId) -> SimulationResult<Vec<ProcessId>> {
        Ok(self
            .inner
            .borrow()
            .resource(id)?
            .line
            .iter()
            .map(|waiter| waiter.process)
            .collect())
    }

    /// Capacity increases take effect at once; decreases are absorbed as
    /// holders release.
    pub(crate) fn set_capacity(&self, id: ResourceId, capacity: usize) -> SimulationResult<()> {
        let mut inner = self.inner.borrow_mut();
        let res = inner.resource_mut(id)?;
        let previous = res.capacity;
        res.set_capacity(capacity);
        debug!(resource = %id, previous, capacity, in_use = res.in_use, "capacity changed");
        inner.promote_waiters(id);
        Ok(())
    }

    pub(crate) fn signal_name(&self, id: SignalId) -> SimulationResult<String> {
        Ok(self.inner.borrow_mut().signal_mut(id)?.name.clone())
    }

    pub(crate) fn signal_is_on(&self, id: SignalId) -> SimulationResult<bool> {
        Ok(self.inner.borrow_mut().signal_mut(id)?.is_on)
    }

    pub(crate) fn signal_waiting(&self, id: SignalId) -> SimulationResult<usize> {
        Ok(self.inner.borrow_mut().signal_mut(id)?.waiters.len())
    }

    /// Turns a signal on and wakes every waiter in arrival order.
    pub(crate) fn turn_on(&self, id: SignalId) -> SimulationResult<usize> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let signal = inner.signal_mut(id)?;
        signal.is_on = true;
        let waiters = std::mem::take(&mut signal.waiters);
        let mut woken = 0;
        for wait in waiters {
            let kind = match inner.waits.get(&wait) {
                Some(state) if state.outcome == WaitOutcome::Pending => state.kind.clone(),
                _ => continue,
            };
            inner.detach(wait, &kind);
            inner.wake(wait, WaitOutcome::Ready);
            woken += 1;
        }
        debug!(signal = %id, woken, "signal on");
        Ok(woken)
    }

    pub(crate) fn turn_off(&self, id: SignalId) -> SimulationResult<()> {
        self.inner.borrow_mut().signal_mut(id)?.is_on = false;
        debug!(signal = %id, "signal off");
        Ok(())
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak reference to a simulation world.
///
/// This provides handle-based access to the simulation without holding
/// a strong reference that would prevent cleanup. All operations
/// return `SimulationResult` and will fail if the simulation has been dropped.
#[derive(Debug, Clone)]
pub struct WeakSimWorld {
    inner: Weak<RefCell<SimInner>>,
}

impl WeakSimWorld {
    /// Attempts to upgrade this weak reference to a strong reference.
    ///
    /// Returns `Err(SimulationError::SimulationShutdown)` if the simulation
    /// has been dropped.
    pub fn upgrade(&self) -> SimulationResult<SimWorld> {
        self.inner
            .upgrade()
            .map(|inner| SimWorld { inner })
            .ok_or(SimulationError::SimulationShutdown)
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimulationResult<SimTime> {
        Ok(self.upgrade()?.now())
    }
}
