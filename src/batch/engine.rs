//! Batch feature extraction engine
//!
//! Wires the pieces of one run together: output directory, describer
//! settings, work item selection, the worker limit, and the dispatcher.

use super::selector::WorkItemSelector;
use crate::config::RunConfig;
use crate::core::{default_spawner, DispatchMode, Dispatcher, WorkerSpawner};
use crate::error::{IoResultExt, Result};
use crate::progress::ProgressReporter;
use crate::scene::{DescriberConfig, DescriberSource, SceneDescription, View, ViewArtifacts};
use crate::system::{default_probe, ResourceProbe};
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one batch run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Views in the scene
    pub candidates: usize,
    /// Views handed to the dispatcher
    pub selected: usize,
    /// Views skipped because their artifacts already existed
    pub skipped: usize,
    /// How the selected views were run
    pub mode: DispatchMode,
    /// Jobs that panicked, failed or were killed
    pub abnormal: u64,
    /// Where the describer settings came from
    pub describer_source: DescriberSource,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Feature Extraction Summary ===");
        println!("Views:           {}", self.candidates);
        println!("Described:       {}", self.selected);
        println!("Already done:    {}", self.skipped);
        println!("Mode:            {}", self.mode);
        match self.describer_source {
            DescriberSource::Restored => println!("Describer:       restored from previous run"),
            DescriberSource::Created => println!("Describer:       new settings saved"),
        }
        if self.abnormal > 0 {
            println!("Abnormal jobs:   {}", self.abnormal);
        }
        println!(
            "Task done in:    {}",
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64))
        );
    }
}

/// Feature extraction engine
pub struct FeatureEngine {
    /// Configuration
    config: RunConfig,
    /// Resource probe used in automatic mode
    probe: Option<Box<dyn ResourceProbe>>,
    /// Worker launcher used in bounded mode
    spawner: Option<Box<dyn WorkerSpawner>>,
    /// Progress reporter
    progress: Option<ProgressReporter>,
}

impl FeatureEngine {
    /// Create a new engine
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            probe: None,
            spawner: None,
            progress: None,
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Use a specific resource probe instead of the platform default
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Use a specific worker launcher instead of the platform default
    pub fn with_spawner(mut self, spawner: Box<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Run the batch to completion
    pub fn execute(self) -> Result<RunSummary> {
        let start_time = Instant::now();
        let config = &self.config;

        std::fs::create_dir_all(&config.outdir).with_path(&config.outdir)?;

        let scene = SceneDescription::load(&config.input_file)?;
        let (describer, describer_source) = DescriberConfig::resolve(config)?;
        info!("Scene has {} view(s)", scene.len());

        let outdir = config.outdir.as_path();
        let naming = |view: &View| ViewArtifacts::for_image(outdir, &scene.image_path(view));
        let selector = WorkItemSelector::new(&scene.views, naming).with_force(config.force);

        let probe = self.probe.unwrap_or_else(default_probe);
        let mode = DispatchMode::resolve(config.jobs, config.job_memory, probe);
        let spawner = self.spawner.unwrap_or_else(default_spawner);
        let dispatcher = Dispatcher::new(mode, spawner);
        let threads = dispatcher.worker_threads();
        info!("Dispatching in {} mode", mode);

        if let Some(progress) = &self.progress {
            progress.set_total(selector.candidate_count() as u64);
            progress.set_status("Extracting features");
        }

        let mut selection = selector.select();
        let mut selected = 0;
        let mut skipped = 0;

        while let Some(item) = selection.next() {
            if let Some(progress) = &self.progress {
                progress.views_skipped((selection.skipped() - skipped) as u64);
                progress.view_dispatched();
            }
            skipped = selection.skipped();

            let (view, artifacts) = item.into_parts();
            let job = describer
                .job(&config.describer_cmd, scene.image_path(view), artifacts, config.atomic)
                .with_threads(threads);

            // A launch failure ends the run at once; running workers are not
            // waited for.
            if let Err(e) = dispatcher.submit(move || job.run()) {
                if let Some(progress) = &self.progress {
                    progress.finish_error(&e.to_string());
                }
                return Err(e);
            }
            selected += 1;
        }

        if let Some(progress) = &self.progress {
            progress.views_skipped((selection.skipped() - skipped) as u64);
            progress.set_status("Waiting for running workers");
        }
        skipped = selection.skipped();

        dispatcher.drain()?;

        let summary = RunSummary {
            candidates: scene.len(),
            selected,
            skipped,
            mode,
            abnormal: dispatcher.stats().abnormal(),
            describer_source,
            elapsed: start_time.elapsed(),
        };

        info!(
            "Described {} view(s), skipped {}, in {:.2?}",
            summary.selected, summary.skipped, summary.elapsed
        );
        if let Some(progress) = &self.progress {
            progress.finish_success(&format!("{} view(s) described", summary.selected));
        }

        Ok(summary)
    }
}

/// Run a batch with the platform default probe and worker launcher
pub fn run_batch(config: RunConfig) -> Result<RunSummary> {
    FeatureEngine::new(config).execute()
}
