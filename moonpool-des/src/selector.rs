//! Pluggable policies for picking one resource among candidates.
//!
//! A selector is a pure decision over snapshots: it never mutates the world.
//! Use it through [`SimWorld::select_resource`](crate::SimWorld::select_resource).

use crate::{
    config::SelectorConfig,
    resource::{ResourceId, ResourceSnapshot},
};

/// Picks a resource, or none.
///
/// Any `Fn(&[ResourceSnapshot]) -> Option<ResourceId>` is a selector.
pub trait Selector {
    /// Choose among `candidates`, which are given in caller order.
    fn choose(&self, candidates: &[ResourceSnapshot]) -> Option<ResourceId>;
}

impl<F> Selector for F
where
    F: Fn(&[ResourceSnapshot]) -> Option<ResourceId>,
{
    fn choose(&self, candidates: &[ResourceSnapshot]) -> Option<ResourceId> {
        self(candidates)
    }
}

/// Chooses the candidate with the smallest occupancy (holders plus
/// waiters), ignoring candidates at or above a visibility threshold.
///
/// Ties go to the earliest candidate. When every candidate is hidden, no
/// choice is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeastOccupied {
    visibility_threshold: usize,
}

impl LeastOccupied {
    /// Selector hiding candidates whose occupancy reaches `visibility_threshold`.
    pub fn new(visibility_threshold: usize) -> Self {
        Self {
            visibility_threshold,
        }
    }
}

impl From<SelectorConfig> for LeastOccupied {
    fn from(config: SelectorConfig) -> Self {
        Self::new(config.visibility_threshold)
    }
}

impl Selector for LeastOccupied {
    fn choose(&self, candidates: &[ResourceSnapshot]) -> Option<ResourceId> {
        candidates
            .iter()
            .filter(|c| c.occupancy() < self.visibility_threshold)
            .min_by_key(|c| c.occupancy())
            .map(|c| c.id)
    }
}

/// Chooses the first candidate with a free unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstAvailable;

impl Selector for FirstAvailable {
    fn choose(&self, candidates: &[ResourceSnapshot]) -> Option<ResourceId> {
        candidates.iter().find(|c| c.available() > 0).map(|c| c.id)
    }
}
