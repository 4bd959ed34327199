//! # featdispatch - Resource-Aware Batch Feature Extraction
//!
//! featdispatch runs an image describer over every view of a scene, one
//! worker process per image, with the number of simultaneous workers bounded
//! by an explicit limit or by free memory and CPU count.
//!
//! ## Features
//!
//! - **Bounded Process Dispatch**: At most `limit` forked workers outstanding
//! - **Capacity Planning**: Worker limit from free memory and processor count
//! - **Crash Containment**: A worker that panics or aborts never reaches the dispatcher
//! - **Resumable Runs**: Images whose artifacts exist are skipped
//! - **Sequential Mode**: Inline execution without process isolation
//!
//! ## Quick Start
//!
//! ```no_run
//! use featdispatch::batch::run_batch;
//! use featdispatch::config::{JobsSetting, RunConfig};
//! use std::path::PathBuf;
//!
//! let config = RunConfig {
//!     input_file: PathBuf::from("sfm_data.json"),
//!     outdir: PathBuf::from("matches"),
//!     jobs: JobsSetting::Auto,
//!     ..Default::default()
//! };
//!
//! let summary = run_batch(config).unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Dispatching Arbitrary Jobs
//!
//! ```no_run
//! use featdispatch::core::{default_spawner, Dispatcher};
//! use featdispatch::system::CapacityLimit;
//!
//! let limit = CapacityLimit::new(4).unwrap();
//! let dispatcher = Dispatcher::bounded(limit, default_spawner());
//!
//! for id in 0..16 {
//!     dispatcher
//!         .submit(move || {
//!             let _ = std::fs::write(format!("/tmp/out_{}.txt", id), b"done");
//!         })
//!         .unwrap();
//! }
//! dispatcher.drain().unwrap();
//! ```
//!
//! ## Capacity Planning
//!
//! ```no_run
//! use featdispatch::system::{default_probe, CapacityPlanner, DEFAULT_JOB_MEMORY};
//!
//! let planner = CapacityPlanner::new(default_probe());
//! println!("{} jobs fit", planner.plan(DEFAULT_JOB_MEMORY));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod core;
pub mod error;
pub mod progress;
pub mod scene;
pub mod system;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use batch::{run_batch, FeatureEngine, RunSummary};
pub use config::{JobsSetting, RunConfig};
pub use core::{DispatchMode, Dispatcher};
pub use error::{DispatchError, Result};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use featdispatch::prelude::*;
    //! ```

    pub use crate::batch::{run_batch, FeatureEngine, RunSummary, WorkItem, WorkItemSelector};
    pub use crate::config::{DescriberMethod, DescriberPreset, JobsSetting, RunConfig};
    pub use crate::core::{default_spawner, DispatchMode, Dispatcher, WorkerExit, WorkerSpawner};
    pub use crate::error::{DispatchError, Result};
    pub use crate::progress::ProgressReporter;
    pub use crate::scene::{DescriberConfig, SceneDescription};
    pub use crate::system::{default_probe, CapacityLimit, CapacityPlanner, ResourceProbe, ResourceSnapshot};
}
