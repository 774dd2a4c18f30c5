use thiserror::Error;

use crate::process::ProcessId;
use crate::resource::ResourceId;

/// Errors that can occur during simulation operations.
///
/// `Causality`, `InvalidDuration`, `InvalidTime` and `ResourceMisuse` are
/// contract violations returned to the offending call. `Interrupted` is a normal,
/// recoverable result delivered to a waiter that another actor withdrew.
/// `ActorFault` is how an error or panic escaping an actor's behavior
/// surfaces from the run loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// An event was scheduled before the current simulated time.
    #[error("cannot schedule an event at t={requested} when current time is t={current}")]
    Causality {
        /// The requested event time.
        requested: f64,
        /// The clock at the time of the request.
        current: f64,
    },

    /// A delay was negative or not finite.
    #[error("invalid duration {0}: delays must be finite and non-negative")]
    InvalidDuration(f64),

    /// An absolute time was not finite, or a deserialized time was negative.
    #[error("invalid time {0}: times must be finite and non-negative")]
    InvalidTime(f64),

    /// A resource request or release was malformed: zero units, more units
    /// than the resource has, or units the process does not hold.
    #[error("misuse of resource {resource}: {reason}")]
    ResourceMisuse {
        /// The resource involved.
        resource: ResourceId,
        /// What went wrong.
        reason: String,
    },

    /// The wait was withdrawn by another actor before it was satisfied.
    #[error("wait of process {process} was interrupted")]
    Interrupted {
        /// The process whose wait was interrupted.
        process: ProcessId,
    },

    /// An error or panic escaped an actor's behavior.
    #[error("process {process} ({name}) faulted: {message}")]
    ActorFault {
        /// The faulting process.
        process: ProcessId,
        /// Its name.
        name: String,
        /// The rendered error or panic payload.
        message: String,
    },

    /// Tags were mutated after the owning process terminated.
    #[error("tags of process {process} are read-only after termination")]
    TagsFrozen {
        /// The terminated process.
        process: ProcessId,
    },

    /// The simulation is in an invalid state for the requested operation.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),

    /// A configuration value was rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The simulation has been dropped and is no longer accessible.
    #[error("Simulation has been shut down")]
    SimulationShutdown,
}

impl SimulationError {
    /// Returns `true` for the recoverable `Interrupted` result.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SimulationError::Interrupted { .. })
    }
}

/// A type alias for `Result<T, SimulationError>`.
pub type SimulationResult<T> = Result<T, SimulationError>;
