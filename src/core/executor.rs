//! Worker launch capabilities
//!
//! A [`WorkerSpawner`] starts one job and later reports when it has
//! terminated. [`ForkSpawner`] gives every job its own address space;
//! [`InlineSpawner`] runs the job on the calling thread and is used where
//! process isolation is unavailable.

use crate::error::Result;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[cfg(unix)]
use crate::error::DispatchError;
#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
#[cfg(unix)]
use nix::unistd::{fork, ForkResult, Pid};
#[cfg(unix)]
use std::time::Duration;

/// A unit of work. Results travel through the filesystem only.
pub type Job<'a> = Box<dyn FnOnce() + 'a>;

/// Exit code of a worker whose job panicked
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with status 0
    Success,
    /// Exited with a non-zero status
    Failed(i32),
    /// Killed by a signal
    Signaled(i32),
    /// The job panicked
    Panicked,
    /// The process was reaped by someone else
    Lost,
}

impl WorkerExit {
    /// Check if the worker finished normally
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    #[cfg(unix)]
    fn from_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, 0) => Some(Self::Success),
            WaitStatus::Exited(_, PANIC_EXIT_CODE) => Some(Self::Panicked),
            WaitStatus::Exited(_, code) => Some(Self::Failed(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal as i32)),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(code) => write!(f, "exit status {}", code),
            Self::Signaled(signal) => write!(f, "killed by signal {}", signal),
            Self::Panicked => write!(f, "panicked"),
            Self::Lost => write!(f, "reaped elsewhere"),
        }
    }
}

/// One launched worker. Owned by the dispatcher until it is reaped.
#[derive(Debug)]
pub struct WorkerHandle {
    id: u64,
    state: WorkerState,
}

#[derive(Debug)]
enum WorkerState {
    #[cfg(unix)]
    Running(Pid),
    Finished(WorkerExit),
}

impl WorkerHandle {
    fn finished(id: u64, exit: WorkerExit) -> Self {
        Self {
            id,
            state: WorkerState::Finished(exit),
        }
    }

    /// Submission sequence number
    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS process id, if the worker is a separate process
    pub fn pid(&self) -> Option<i32> {
        match self.state {
            #[cfg(unix)]
            WorkerState::Running(pid) => Some(pid.as_raw()),
            WorkerState::Finished(_) => None,
        }
    }
}

/// Capability to launch jobs and wait for them
pub trait WorkerSpawner: Send + Sync {
    /// Launch `job`. An error here is fatal to the whole dispatch.
    fn spawn<'a>(&self, id: u64, job: Job<'a>) -> Result<WorkerHandle>;

    /// Block until one of `workers` has terminated and return its index.
    ///
    /// `workers` is never empty.
    fn wait_any(&self, workers: &[WorkerHandle]) -> Result<(usize, WorkerExit)>;

    /// Whether jobs run in their own address space
    fn is_isolated(&self) -> bool;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Run a job on the current thread, containing panics
pub fn run_contained(job: Job<'_>) -> WorkerExit {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => WorkerExit::Success,
        Err(_) => WorkerExit::Panicked,
    }
}

/// Runs each job to completion inside `spawn`
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl WorkerSpawner for InlineSpawner {
    fn spawn<'a>(&self, id: u64, job: Job<'a>) -> Result<WorkerHandle> {
        Ok(WorkerHandle::finished(id, run_contained(job)))
    }

    fn wait_any(&self, workers: &[WorkerHandle]) -> Result<(usize, WorkerExit)> {
        let found = workers.iter().enumerate().find_map(|(index, worker)| match worker.state {
            WorkerState::Finished(exit) => Some((index, exit)),
            #[cfg(unix)]
            WorkerState::Running(_) => None,
        });
        Ok(found.unwrap_or((0, WorkerExit::Lost)))
    }

    fn is_isolated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Forks one child process per job.
///
/// Only this spawner's own children are waited on, so several dispatchers
/// can live in one process. With more than one child outstanding the
/// children are polled, backing off up to `poll_interval`.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct ForkSpawner {
    poll_interval: Duration,
}

#[cfg(unix)]
impl Default for ForkSpawner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
        }
    }
}

#[cfg(unix)]
impl ForkSpawner {
    /// Create a fork spawner
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest sleep between polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_micros(100));
        self
    }

    fn wait_blocking(pid: Pid) -> Result<WorkerExit> {
        loop {
            match waitpid(pid, None) {
                Ok(status) => {
                    if let Some(exit) = WorkerExit::from_status(status) {
                        return Ok(exit);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Ok(WorkerExit::Lost),
                Err(e) => return Err(DispatchError::Wait(e.into())),
            }
        }
    }

    fn try_wait(pid: Pid) -> Result<Option<WorkerExit>> {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => Ok(None),
            Ok(status) => Ok(WorkerExit::from_status(status)),
            Err(Errno::ECHILD) => Ok(Some(WorkerExit::Lost)),
            Err(e) => Err(DispatchError::Wait(e.into())),
        }
    }
}

#[cfg(unix)]
impl WorkerSpawner for ForkSpawner {
    fn spawn<'a>(&self, id: u64, job: Job<'a>) -> Result<WorkerHandle> {
        // SAFETY: the child only runs the job and then leaves through
        // `_exit`, skipping destructors and atexit handlers it shares with
        // the parent.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = match run_contained(job) {
                    WorkerExit::Success => 0,
                    _ => PANIC_EXIT_CODE,
                };
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => Ok(WorkerHandle {
                id,
                state: WorkerState::Running(child),
            }),
            Err(e) => Err(DispatchError::Spawn(e.into())),
        }
    }

    fn wait_any(&self, workers: &[WorkerHandle]) -> Result<(usize, WorkerExit)> {
        if let [only] = workers {
            return match only.state {
                WorkerState::Running(pid) => Ok((0, Self::wait_blocking(pid)?)),
                WorkerState::Finished(exit) => Ok((0, exit)),
            };
        }

        let mut backoff = Duration::from_micros(200).min(self.poll_interval);
        loop {
            for (index, worker) in workers.iter().enumerate() {
                let exit = match worker.state {
                    WorkerState::Running(pid) => Self::try_wait(pid)?,
                    WorkerState::Finished(exit) => Some(exit),
                };
                if let Some(exit) = exit {
                    return Ok((index, exit));
                }
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(self.poll_interval);
        }
    }

    fn is_isolated(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "fork"
    }
}

/// Pick the spawner for this platform: fork where available, inline otherwise
pub fn default_spawner() -> Box<dyn WorkerSpawner> {
    #[cfg(unix)]
    {
        Box::new(ForkSpawner::new())
    }
    #[cfg(not(unix))]
    {
        Box::new(InlineSpawner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_run_contained() {
        assert_eq!(run_contained(Box::new(|| {})), WorkerExit::Success);
        assert_eq!(run_contained(Box::new(|| {
            panic!("boom");
        })), WorkerExit::Panicked);
    }

    #[test]
    fn test_inline_spawner_runs_immediately() {
        let ran = Cell::new(false);
        let handle = InlineSpawner.spawn(7, Box::new(|| ran.set(true))).unwrap();
        assert!(ran.get());
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.pid(), None);

        let (index, exit) = InlineSpawner.wait_any(&[handle]).unwrap();
        assert_eq!(index, 0);
        assert!(exit.is_success());
    }

    #[test]
    fn test_worker_exit_display() {
        assert_eq!(WorkerExit::Failed(3).to_string(), "exit status 3");
        assert_eq!(WorkerExit::Signaled(9).to_string(), "killed by signal 9");
        assert!(!WorkerExit::Panicked.is_success());
    }

    #[cfg(unix)]
    mod fork {
        use super::super::*;
        use tempfile::tempdir;

        #[test]
        fn test_child_runs_in_separate_process() {
            let dir = tempdir().unwrap();
            let marker = dir.path().join("pid");
            let spawner = ForkSpawner::new();

            let handle = spawner
                .spawn(0, Box::new(|| {
                    let _ = std::fs::write(&marker, std::process::id().to_string());
                }))
                .unwrap();
            let child_pid = handle.pid().unwrap();

            let (_, exit) = spawner.wait_any(&[handle]).unwrap();
            assert_eq!(exit, WorkerExit::Success);

            let written: u32 = std::fs::read_to_string(&marker).unwrap().parse().unwrap();
            assert_eq!(written as i32, child_pid);
            assert_ne!(written, std::process::id());
        }

        #[test]
        fn test_child_faults_are_reported_not_propagated() {
            let spawner = ForkSpawner::new().with_poll_interval(Duration::from_millis(1));

            let panicking = spawner
                .spawn(0, Box::new(|| {
                    panic!("job failed");
                }))
                .unwrap();
            let (_, exit) = spawner.wait_any(&[panicking]).unwrap();
            assert_eq!(exit, WorkerExit::Panicked);

            let aborting = spawner
                .spawn(1, Box::new(|| {
                    std::process::abort();
                }))
                .unwrap();
            let (_, exit) = spawner.wait_any(&[aborting]).unwrap();
            assert_eq!(exit, WorkerExit::Signaled(libc::SIGABRT));
        }

        #[test]
        fn test_wait_any_returns_first_to_finish() {
            let spawner = ForkSpawner::new().with_poll_interval(Duration::from_millis(1));
            let slow = spawner
                .spawn(0, Box::new(|| std::thread::sleep(Duration::from_millis(400))))
                .unwrap();
            let fast = spawner.spawn(1, Box::new(|| {})).unwrap();

            let mut workers = vec![slow, fast];
            let (index, exit) = spawner.wait_any(&workers).unwrap();
            assert_eq!(workers[index].id(), 1);
            assert!(exit.is_success());

            workers.remove(index);
            let (_, exit) = spawner.wait_any(&workers).unwrap();
            assert!(exit.is_success());
        }
    }
}
