//! Worker-count planning
//!
//! Sizes the dispatcher from a resource snapshot: one worker per
//! `per_job_memory` bytes of available memory, capped by the processor
//! count, and never less than one so the batch always makes progress.

use super::resources::{ResourceProbe, ResourceSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use tracing::info;

/// Default memory reserved for one describe job (2 GiB)
pub const DEFAULT_JOB_MEMORY: u64 = 2 * 1024 * 1024 * 1024;

/// Maximum number of workers allowed to run at once. Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapacityLimit(NonZeroUsize);

impl CapacityLimit {
    /// Sequential fallback
    pub const ONE: Self = Self(NonZeroUsize::MIN);

    /// Build a limit, rejecting zero
    pub fn new(limit: usize) -> Option<Self> {
        NonZeroUsize::new(limit).map(Self)
    }

    /// Build a limit, raising zero to one
    pub fn at_least_one(limit: usize) -> Self {
        Self::new(limit).unwrap_or(Self::ONE)
    }

    /// The limit as a plain integer
    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl From<NonZeroUsize> for CapacityLimit {
    fn from(limit: NonZeroUsize) -> Self {
        Self(limit)
    }
}

impl fmt::Display for CapacityLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turns resource snapshots into a [`CapacityLimit`]
pub struct CapacityPlanner {
    probe: Box<dyn ResourceProbe>,
}

impl CapacityPlanner {
    /// Create a planner reading from the given probe
    pub fn new(probe: Box<dyn ResourceProbe>) -> Self {
        Self { probe }
    }

    /// Take a fresh snapshot and compute the limit.
    ///
    /// # Panics
    /// Panics if `per_job_memory` is zero.
    pub fn plan(&self, per_job_memory: u64) -> CapacityLimit {
        assert!(per_job_memory > 0, "per-job memory requirement must be positive");

        let snapshot = self.probe.snapshot();
        let limit = Self::limit_for(&snapshot, per_job_memory);

        info!(
            "Planned {} concurrent job(s) from {} probe: {} available, {} processors, {} per job",
            limit,
            self.probe.name(),
            humansize::format_size(snapshot.available_memory(), humansize::BINARY),
            snapshot.processor_count,
            humansize::format_size(per_job_memory, humansize::BINARY),
        );

        limit
    }

    /// `max(1, min(available / per_job_memory, processors))`.
    ///
    /// A zero processor count means the probe knew nothing about CPUs, so
    /// only the memory bound applies.
    pub fn limit_for(snapshot: &ResourceSnapshot, per_job_memory: u64) -> CapacityLimit {
        assert!(per_job_memory > 0, "per-job memory requirement must be positive");

        let memory_slots = snapshot.available_memory() / per_job_memory;
        let memory_slots = usize::try_from(memory_slots).unwrap_or(usize::MAX);

        let slots = match snapshot.processor_count {
            0 => memory_slots,
            processors => memory_slots.min(processors),
        };

        CapacityLimit::at_least_one(slots)
    }
}
