//! Bounded process dispatcher
//!
//! Runs submitted jobs either inline (sequential mode) or in worker
//! processes, keeping at most `limit` workers outstanding.
//!
//! In bounded mode the fill check is `active % limit == 0`, evaluated right
//! after each launch. Once the limit is reached every further submission
//! waits for one worker to finish before returning, so slots are refilled
//! one at a time as workers complete instead of in lockstep batches.

use super::executor::{run_contained, Job, WorkerExit, WorkerHandle, WorkerSpawner};
use crate::config::JobsSetting;
use crate::error::Result;
use crate::system::{CapacityLimit, CapacityPlanner, ResourceProbe};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// How submitted jobs are run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run each job synchronously in the caller, no isolation
    Sequential,
    /// Run jobs in workers, at most `limit` at once
    Bounded(CapacityLimit),
}

impl DispatchMode {
    /// Resolve the user's jobs setting. The planner only runs for
    /// [`JobsSetting::Auto`].
    pub fn resolve(jobs: JobsSetting, job_memory: u64, probe: Box<dyn ResourceProbe>) -> Self {
        match jobs {
            JobsSetting::Sequential => Self::Sequential,
            JobsSetting::Fixed(limit) => Self::Bounded(limit.into()),
            JobsSetting::Auto => Self::Bounded(CapacityPlanner::new(probe).plan(job_memory)),
        }
    }

    /// Worker limit, if bounded
    pub fn limit(&self) -> Option<CapacityLimit> {
        match self {
            Self::Sequential => None,
            Self::Bounded(limit) => Some(*limit),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Bounded(limit) => write!(f, "bounded ({} jobs)", limit),
        }
    }
}

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    abnormal: AtomicU64,
    peak_active: AtomicUsize,
}

impl DispatchStats {
    /// Jobs submitted so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs known to have finished (inline runs and reaped workers)
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Workers that panicked, failed or were killed
    pub fn abnormal(&self) -> u64 {
        self.abnormal.load(Ordering::Relaxed)
    }

    /// Highest number of workers outstanding at once
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct DispatcherState {
    workers: Vec<WorkerHandle>,
    next_id: u64,
}

/// Bounded-concurrency job dispatcher
pub struct Dispatcher {
    mode: DispatchMode,
    spawner: Box<dyn WorkerSpawner>,
    state: Mutex<DispatcherState>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(mode: DispatchMode, spawner: Box<dyn WorkerSpawner>) -> Self {
        debug!(
            "Dispatcher created: {} via {} spawner (isolated: {})",
            mode,
            spawner.name(),
            spawner.is_isolated()
        );
        Self {
            mode,
            spawner,
            state: Mutex::new(DispatcherState::default()),
            stats: DispatchStats::default(),
        }
    }

    /// Dispatcher that runs every job inline
    pub fn sequential(spawner: Box<dyn WorkerSpawner>) -> Self {
        Self::new(DispatchMode::Sequential, spawner)
    }

    /// Dispatcher with an explicit worker limit
    pub fn bounded(limit: CapacityLimit, spawner: Box<dyn WorkerSpawner>) -> Self {
        Self::new(DispatchMode::Bounded(limit), spawner)
    }

    /// Current mode
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Threads each job may use, if the dispatcher decides.
    ///
    /// Jobs in separate worker processes get one thread each, so that
    /// `limit` workers never oversubscribe the processors. Jobs run inline
    /// under a limit share the whole budget one at a time. Sequential mode
    /// leaves the choice to the job.
    pub fn worker_threads(&self) -> Option<NonZeroUsize> {
        match self.mode {
            DispatchMode::Sequential => None,
            DispatchMode::Bounded(_) if self.spawner.is_isolated() => Some(NonZeroUsize::MIN),
            DispatchMode::Bounded(limit) => NonZeroUsize::new(limit.get()),
        }
    }

    /// Counters
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Workers currently outstanding
    pub fn active_count(&self) -> usize {
        self.lock_state().workers.len()
    }

    /// Submit one job.
    ///
    /// Sequential mode runs `job` before returning; a panic is contained
    /// and logged. Bounded mode launches a worker and, if the dispatcher is
    /// now full, waits for one worker to terminate. A launch failure is
    /// returned and must abort the dispatch.
    pub fn submit<'a, F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + 'a,
    {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let limit = match self.mode {
            DispatchMode::Sequential => {
                let exit = run_contained(Box::new(job));
                self.record_exit(self.stats.submitted() - 1, exit);
                return Ok(());
            }
            DispatchMode::Bounded(limit) => limit,
        };

        let mut state = self.lock_state();
        let id = state.next_id;
        state.next_id += 1;

        let job: Job<'a> = Box::new(job);
        let handle = self.spawner.spawn(id, job)?;
        debug!("Launched worker {} (pid {:?})", id, handle.pid());
        state.workers.push(handle);

        let active = state.workers.len();
        self.stats.peak_active.fetch_max(active, Ordering::Relaxed);

        if active % limit.get() == 0 {
            debug!("All {} slots busy, waiting for a worker", limit);
            self.reap_locked(&mut state)?;
        }

        Ok(())
    }

    /// Wait for any one outstanding worker to terminate.
    ///
    /// Returns `false` when nothing was outstanding.
    pub fn reap_one(&self) -> Result<bool> {
        let mut state = self.lock_state();
        self.reap_locked(&mut state)
    }

    /// Block until every outstanding worker has terminated.
    ///
    /// Returns the number of workers reaped; zero when none were
    /// outstanding.
    pub fn drain(&self) -> Result<usize> {
        let mut reaped = 0;
        while self.reap_one()? {
            reaped += 1;
        }
        if reaped > 0 {
            info!("All workers finished ({} reaped at completion)", reaped);
        }
        Ok(reaped)
    }

    fn reap_locked(&self, state: &mut DispatcherState) -> Result<bool> {
        if state.workers.is_empty() {
            return Ok(false);
        }

        let (index, exit) = self.spawner.wait_any(&state.workers)?;
        let handle = state.workers.remove(index);
        self.record_exit(handle.id(), exit);
        debug!(
            "Reaped worker {} ({}), {} outstanding",
            handle.id(),
            exit,
            state.workers.len()
        );
        Ok(true)
    }

    fn record_exit(&self, id: u64, exit: WorkerExit) {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        if !exit.is_success() {
            self.stats.abnormal.fetch_add(1, Ordering::Relaxed);
            warn!("Job {} ended abnormally: {}", id, exit);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let outstanding = self.lock_state().workers.len();
        if outstanding > 0 {
            warn!(
                "Dispatcher dropped with {} outstanding worker(s); their results may be lost",
                outstanding
            );
        }
    }
}
