//! Image describer settings and the per-image describe job
//!
//! The describer itself is an external program. Its settings are saved to
//! `image_describer.json` in the output directory so that later runs
//! describe new images the same way the existing ones were described.

use super::sfm::ViewArtifacts;
use crate::config::{DescriberMethod, DescriberPreset, RunConfig};
use crate::error::{DispatchError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

/// File name of the saved describer settings
pub const DESCRIBER_FILE: &str = "image_describer.json";

/// Suffix of artifacts being written in atomic mode
const PARTIAL_SUFFIX: &str = ".partial";

/// Environment variable carrying the describer's thread budget
const OMP_THREADS_VAR: &str = "OMP_NUM_THREADS";

/// Settings that determine how images are described
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriberConfig {
    /// Description method
    pub method: DescriberMethod,
    /// Upright features (no orientation)
    pub upright: bool,
    /// Density preset
    pub preset: DescriberPreset,
}

/// On-disk layout of [`DESCRIBER_FILE`]
#[derive(Debug, Serialize, Deserialize)]
struct DescriberFile {
    image_describer: DescriberConfig,
    regions_type: String,
}

/// Where the active describer settings came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriberSource {
    /// Restored from an earlier run's settings file
    Restored,
    /// Built from the command line and saved
    Created,
}

impl DescriberConfig {
    /// Settings requested on the command line
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            method: config.method,
            upright: config.upright,
            preset: config.preset,
        }
    }

    /// Path of the settings file inside `outdir`
    pub fn file_path(outdir: &Path) -> PathBuf {
        outdir.join(DESCRIBER_FILE)
    }

    /// Load saved settings
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let file: DescriberFile = serde_json::from_str(&text).map_err(|e| {
            DispatchError::DescriberError(format!(
                "cannot restore describer settings from '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(file.image_describer)
    }

    /// Save settings together with the region type they produce
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = DescriberFile {
            image_describer: *self,
            regions_type: self.method.regions_type().to_string(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json).with_path(path)
    }

    /// Reuse the settings saved in the output directory unless `force` is
    /// set; otherwise take them from the command line and save them.
    pub fn resolve(config: &RunConfig) -> Result<(Self, DescriberSource)> {
        let path = Self::file_path(&config.outdir);

        if !config.force && path.is_file() {
            let restored = Self::load(&path)?;
            info!(
                "Restored describer settings from {}: {} / {}",
                path.display(),
                restored.method.as_str(),
                restored.preset.as_str()
            );
            return Ok((restored, DescriberSource::Restored));
        }

        let created = Self::from_run_config(config);
        created.save(&path)?;
        info!("Saved describer settings to {}", path.display());
        Ok((created, DescriberSource::Created))
    }

    /// Build the job describing one image
    pub fn job(&self, program: &str, image: PathBuf, artifacts: ViewArtifacts, atomic: bool) -> DescribeJob {
        DescribeJob {
            program: program.to_string(),
            config: *self,
            image,
            artifacts,
            atomic,
            threads: None,
        }
    }
}

/// Describes one image by running the external describer program.
///
/// Invocation: `<program> --method M --preset P [--upright] <image> <feat> <desc>`.
/// `program` may carry leading arguments separated by whitespace, for
/// example `python3 describe.py`.
///
/// A thread budget, when set, reaches the describer as `OMP_NUM_THREADS`.
#[derive(Debug, Clone)]
pub struct DescribeJob {
    program: String,
    config: DescriberConfig,
    image: PathBuf,
    artifacts: ViewArtifacts,
    atomic: bool,
    threads: Option<NonZeroUsize>,
}

impl DescribeJob {
    /// Cap the threads the describer may use. `None` keeps the inherited
    /// environment.
    pub fn with_threads(mut self, threads: Option<NonZeroUsize>) -> Self {
        self.threads = threads;
        self
    }

    /// Run the job. Failures are swallowed: an image that cannot be
    /// described is left without artifacts and retried by the next run.
    pub fn run(&self) {
        if self.execute().is_err() && self.atomic {
            self.remove_partials();
        }
    }

    /// Run the job and report whether artifacts were produced
    pub fn execute(&self) -> io::Result<bool> {
        if !self.image.is_file() {
            return Ok(false);
        }

        let (feat, desc) = if self.atomic {
            (partial_path(self.artifacts.feat()), partial_path(self.artifacts.desc()))
        } else {
            (self.artifacts.feat().to_path_buf(), self.artifacts.desc().to_path_buf())
        };

        let mut words = self.program.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty describer command"))?;

        let mut command = Command::new(program);
        command
            .args(words)
            .arg("--method")
            .arg(self.config.method.as_str())
            .arg("--preset")
            .arg(self.config.preset.as_str());
        if self.config.upright {
            command.arg("--upright");
        }
        if let Some(threads) = self.threads {
            command.env(OMP_THREADS_VAR, threads.to_string());
        }
        let status = command
            .arg(&self.image)
            .arg(&feat)
            .arg(&desc)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;

        if !status.success() {
            if self.atomic {
                self.remove_partials();
            }
            return Ok(false);
        }

        if self.atomic {
            std::fs::rename(&feat, self.artifacts.feat())?;
            std::fs::rename(&desc, self.artifacts.desc())?;
        }
        Ok(true)
    }

    fn remove_partials(&self) {
        let _ = std::fs::remove_file(partial_path(self.artifacts.feat()));
        let _ = std::fs::remove_file(partial_path(self.artifacts.desc()));
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsSetting;
    use tempfile::tempdir;

    fn run_config(outdir: &Path) -> RunConfig {
        RunConfig {
            outdir: outdir.to_path_buf(),
            method: DescriberMethod::AkazeFloat,
            preset: DescriberPreset::High,
            jobs: JobsSetting::Sequential,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_creates_then_restores() {
        let dir = tempdir().unwrap();
        let config = run_config(dir.path());

        let (created, source) = DescriberConfig::resolve(&config).unwrap();
        assert_eq!(source, DescriberSource::Created);
        assert_eq!(created.method, DescriberMethod::AkazeFloat);

        let text = std::fs::read_to_string(DescriberConfig::file_path(dir.path())).unwrap();
        assert!(text.contains("AKAZE_Float_Regions"));

        // A later run asking for SIFT keeps the saved AKAZE settings.
        let mut later = config.clone();
        later.method = DescriberMethod::Sift;
        let (restored, source) = DescriberConfig::resolve(&later).unwrap();
        assert_eq!(source, DescriberSource::Restored);
        assert_eq!(restored, created);
    }

    #[test]
    fn test_force_overwrites_saved_settings() {
        let dir = tempdir().unwrap();
        DescriberConfig::resolve(&run_config(dir.path())).unwrap();

        let mut forced = run_config(dir.path());
        forced.method = DescriberMethod::AkazeMldb;
        forced.force = true;
        let (config, source) = DescriberConfig::resolve(&forced).unwrap();
        assert_eq!(source, DescriberSource::Created);
        assert_eq!(config.method, DescriberMethod::AkazeMldb);
        assert_eq!(
            DescriberConfig::load(&DescriberConfig::file_path(dir.path())).unwrap().method,
            DescriberMethod::AkazeMldb
        );
    }

    #[test]
    fn test_corrupt_settings_file() {
        let dir = tempdir().unwrap();
        std::fs::write(DescriberConfig::file_path(dir.path()), "not json").unwrap();
        let err = DescriberConfig::resolve(&run_config(dir.path())).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/a.feat")),
            PathBuf::from("/out/a.feat.partial")
        );
    }

    #[cfg(unix)]
    mod program {
        use super::*;
        use crate::testing::describer_script as script;

        fn setup(dir: &Path) -> (PathBuf, ViewArtifacts) {
            let image = dir.join("img.jpg");
            std::fs::write(&image, b"pixels").unwrap();
            let artifacts = ViewArtifacts::for_image(dir, &image);
            (image, artifacts)
        }

        fn config() -> DescriberConfig {
            DescriberConfig {
                method: DescriberMethod::Sift,
                upright: true,
                preset: DescriberPreset::Normal,
            }
        }

        #[test]
        fn test_job_writes_artifacts() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "ok.sh", "cp \"$1\" \"$2\" && cp \"$1\" \"$3\"");
            let (image, artifacts) = setup(dir.path());

            let job = config().job(&program, image, artifacts.clone(), false);
            assert!(job.execute().unwrap());
            assert_eq!(std::fs::read(artifacts.feat()).unwrap(), b"pixels");
            assert!(artifacts.desc().exists());
        }

        #[test]
        fn test_thread_budget_reaches_describer() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "env.sh", "echo \"${OMP_NUM_THREADS:-unset}\" > \"$2\"; cp \"$1\" \"$3\"");
            let (image, artifacts) = setup(dir.path());

            let job = config()
                .job(&program, image, artifacts.clone(), false)
                .with_threads(NonZeroUsize::new(3));
            assert!(job.execute().unwrap());
            assert_eq!(std::fs::read_to_string(artifacts.feat()).unwrap().trim(), "3");
        }

        #[test]
        fn test_missing_image_is_skipped() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "ok.sh", "cp \"$1\" \"$2\" && cp \"$1\" \"$3\"");
            let artifacts = ViewArtifacts::for_image(dir.path(), Path::new("gone.jpg"));

            let job = config().job(&program, dir.path().join("gone.jpg"), artifacts.clone(), false);
            assert!(!job.execute().unwrap());
            job.run();
            assert!(!artifacts.feat().exists());
        }

        #[test]
        fn test_missing_program_fails_silently() {
            let dir = tempdir().unwrap();
            let (image, artifacts) = setup(dir.path());
            let job = config().job("/nonexistent/describer", image, artifacts.clone(), false);
            assert!(job.execute().is_err());
            job.run();
            assert!(!artifacts.feat().exists());
        }

        #[test]
        fn test_failed_run_keeps_partial_output_without_atomic() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "crash.sh", "echo half > \"$2\"; echo half > \"$3\"; exit 3");
            let (image, artifacts) = setup(dir.path());

            let job = config().job(&program, image, artifacts.clone(), false);
            assert!(!job.execute().unwrap());
            // Truncated output looks done to the next run.
            assert!(artifacts.feat().exists() && artifacts.desc().exists());
        }

        #[test]
        fn test_atomic_mode_discards_failed_output() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "crash.sh", "echo half > \"$2\"; echo half > \"$3\"; exit 3");
            let (image, artifacts) = setup(dir.path());

            let job = config().job(&program, image, artifacts.clone(), true);
            assert!(!job.execute().unwrap());
            assert!(!artifacts.feat().exists());
            assert!(!partial_path(artifacts.feat()).exists());
            assert!(!partial_path(artifacts.desc()).exists());
        }

        #[test]
        fn test_atomic_mode_renames_on_success() {
            let dir = tempdir().unwrap();
            let program = script(dir.path(), "ok.sh", "cp \"$1\" \"$2\" && cp \"$1\" \"$3\"");
            let (image, artifacts) = setup(dir.path());

            let job = config().job(&program, image, artifacts.clone(), true);
            assert!(job.execute().unwrap());
            assert!(artifacts.feat().exists() && artifacts.desc().exists());
            assert!(!partial_path(artifacts.feat()).exists());
        }
    }
}
