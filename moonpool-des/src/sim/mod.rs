//! Core simulation engine.
//!
//! This module provides the central SimWorld coordinator that manages time,
//! event processing and the process, resource, signal and queue tables.
//!
//! ## Submodules
//!
//! - `world` - Core SimWorld and WeakSimWorld types
//! - `events` - Event types and queue for scheduling
//! - `state` - Process, wait, resource, signal and queue state

pub mod events;
pub mod state;
pub mod world;

// Re-export main types at module level
pub use events::{Event, EventHandle, EventQueue, PendingEvent, ScheduledEvent};
pub use state::WaitId;
pub use world::{RunState, SimWorld, SimulationMetrics, WeakSimWorld};
