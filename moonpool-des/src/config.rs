//! # Simulation Configuration
//!
//! | Parameter | Config Field | Default | Description |
//! |-----------|--------------|---------|-------------|
//! | Start time | `start_time` | `0.0` | Initial value of the simulated clock |
//! | Horizon | `horizon` | none | Absolute time past which `run` stops |
//! | Panic capture | `catch_panics` | `true` | Turn actor panics into `ActorFault` errors |
//!
//! Routing thresholds are scenario values, so [`SelectorConfig`] carries no
//! default and must be supplied by the model.
//!
//! ## Configuration Examples
//!
//! ```rust
//! use moonpool_des::SimulationConfig;
//!
//! let config: SimulationConfig = serde_json::from_str(r#"{ "horizon": 480.0 }"#).unwrap();
//! assert_eq!(config.start_time, 0.0);
//! assert_eq!(config.horizon, Some(480.0));
//! assert!(config.catch_panics);
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{SimulationError, SimulationResult},
    time::SimTime,
};

/// Kernel-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Initial value of the simulated clock.
    pub start_time: f64,

    /// Absolute simulated time past which `run` stops with events left
    /// queued. `None` runs until the queue drains or a stop is requested.
    pub horizon: Option<f64>,

    /// When `true`, a panic escaping an actor terminates that actor and is
    /// reported as [`SimulationError::ActorFault`]. When `false` the panic
    /// unwinds through the run loop.
    pub catch_panics: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            horizon: None,
            catch_panics: true,
        }
    }
}

impl SimulationConfig {
    /// Check the values and return the validated start time.
    pub fn validate(&self) -> SimulationResult<SimTime> {
        let start = SimTime::from_f64(self.start_time).ok_or_else(|| {
            SimulationError::InvalidConfiguration(format!(
                "start_time must be finite and non-negative, got {}",
                self.start_time
            ))
        })?;
        if let Some(horizon) = self.horizon {
            match SimTime::from_f64(horizon) {
                Some(h) if h >= start => {}
                _ => {
                    return Err(SimulationError::InvalidConfiguration(format!(
                        "horizon {horizon} must be finite and not before start_time {}",
                        self.start_time
                    )));
                }
            }
        }
        Ok(start)
    }

    /// The horizon as a [`SimTime`], if set and valid.
    pub(crate) fn horizon_time(&self) -> Option<SimTime> {
        self.horizon.and_then(SimTime::from_f64)
    }
}

/// Settings for occupancy-based routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Candidates whose occupancy (holders plus waiters) reaches this value
    /// are not visible to the selector.
    pub visibility_threshold: usize,
}
