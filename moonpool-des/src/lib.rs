//! # Moonpool Discrete-Event Simulation Kernel
//!
//! A deterministic discrete-event simulation kernel with cooperative
//! processes, meant as the core of queueing and service models: travelers
//! through security lanes, parcels through belts, customers through tellers.
//!
//! - Simulated time only moves when the next event is popped; ties at the
//!   same instant fire in submission order.
//! - Processes are async behaviors driven by the world itself. They suspend
//!   on time ([`ProcessContext::advance`]), counted [`Resource`]s with a
//!   prioritized line, boolean [`Signal`]s, ordered [`Queue`]s, or an
//!   explicit pause.
//! - Every process owns a private [`TagSet`]; children start from a copy.
//! - An error or panic escaping a process surfaces from [`SimWorld::run`]
//!   as [`SimulationError::ActorFault`]; the world stays resumable.
//!
//! Everything is single threaded and the same inputs always produce the same
//! event order and clock values.
//!
//! ## Example Usage
//!
//! ```rust
//! use moonpool_des::SimWorld;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let mut sim = SimWorld::new();
//! let desk = sim.create_resource("desk", 1).unwrap();
//! let served = Rc::new(RefCell::new(Vec::new()));
//!
//! for name in ["ana", "bo"] {
//!     let desk = desk.clone();
//!     let served = served.clone();
//!     sim.spawn(name, move |ctx| async move {
//!         ctx.acquire(&desk, 0).await?;
//!         ctx.advance(3.0).await?;
//!         served.borrow_mut().push((name, ctx.now()?.as_f64()));
//!         ctx.release(&desk)
//!     })
//!     .unwrap();
//! }
//!
//! sim.run().unwrap();
//! assert_eq!(*served.borrow(), vec![("ana", 3.0), ("bo", 6.0)]);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Kernel and selector configuration.
pub mod config;
/// Error types and utilities for simulation operations.
pub mod error;
/// Processes and their context.
pub mod process;
/// Counted resources.
pub mod resource;
/// Ordered queues of parked processes.
pub mod queue;
/// Resource selection policies.
pub mod selector;
/// Boolean signals.
pub mod signal;
/// Core simulation world and coordination logic.
pub mod sim;
/// Per-process tags.
pub mod tags;
/// Simulated time.
pub mod time;

pub use config::{SelectorConfig, SimulationConfig};
pub use error::{SimulationError, SimulationResult};
pub use process::{
    AcquireFuture, AdvanceFuture, JoinFuture, PauseFuture, ProcessContext, ProcessId,
    ProcessSnapshot, ProcessStatus, SignalFuture,
};
pub use queue::{Queue, QueueId};
pub use resource::{Hold, Resource, ResourceId, ResourceSnapshot};
pub use selector::{FirstAvailable, LeastOccupied, Selector};
pub use signal::{Signal, SignalId};
pub use sim::{EventHandle, PendingEvent, RunState, SimWorld, SimulationMetrics, WeakSimWorld};
pub use tags::TagSet;
pub use time::SimTime;
