//! Configuration settings for featdispatch
//!
//! Defines the CLI arguments, the describer choices, and the validated
//! runtime configuration handed to the batch runner.

use crate::error::{DispatchError, Result};
use crate::system::DEFAULT_JOB_MEMORY;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// featdispatch - compute per-image features with bounded process parallelism
#[derive(Parser, Debug, Clone)]
#[command(name = "featdispatch")]
#[command(author = "featdispatch Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resource-aware batch feature extraction over a scene description")]
#[command(long_about = r#"
featdispatch runs an image describer over every view of a scene description,
one worker process per image, and skips images whose feature and descriptor
files already exist.

Concurrency:
  (no -j)   run every image sequentially inside this process
  -j 0      choose the worker count from free memory and CPU count
  -j N      run at most N worker processes at once

Examples:
  featdispatch -i scene.json -o matches/                # Sequential
  featdispatch -i scene.json -o matches/ -j 0           # Automatic
  featdispatch -i scene.json -o matches/ -j 4 --force   # Recompute all
"#)]
pub struct CliArgs {
    /// Scene description file (JSON)
    #[arg(short = 'i', long = "input_file", visible_alias = "input-file", value_name = "PATH")]
    pub input_file: PathBuf,

    /// Output directory for features, descriptors and describer settings
    #[arg(short = 'o', long, value_name = "PATH")]
    pub outdir: PathBuf,

    /// Method used to describe an image
    #[arg(short = 'm', long = "describerMethod", visible_alias = "describer-method", value_enum, default_value = "SIFT")]
    pub describer_method: DescriberMethod,

    /// Use upright features (no orientation)
    #[arg(short = 'u', long)]
    pub upright: bool,

    /// Force recomputation of existing features
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Describer configuration preset (ULTRA can take a long time)
    #[arg(short = 'p', long = "describerPreset", visible_alias = "describer-preset", value_enum)]
    pub describer_preset: Option<DescriberPreset>,

    /// Number of jobs to run simultaneously (0 = automatic)
    #[arg(short = 'j', long, allow_negative_numbers = true, value_name = "NUM")]
    pub jobs: Option<i64>,

    /// Memory reserved per job in automatic mode (e.g. 2G, 512M)
    #[arg(long, default_value = "2G", value_name = "SIZE")]
    pub job_memory: String,

    /// External describer program invoked once per image
    #[arg(long, env = "FEATDISPATCH_DESCRIBER", default_value = "openMVG_describe", value_name = "CMD")]
    pub describer_cmd: String,

    /// Write artifacts to temporary paths and rename them on success
    #[arg(long)]
    pub atomic: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Image description method
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DescriberMethod {
    /// SIFT keypoints with floating point descriptors
    #[default]
    #[value(name = "SIFT")]
    Sift,
    /// AKAZE with floating point (MSURF) descriptors
    #[value(name = "AKAZE_FLOAT")]
    AkazeFloat,
    /// AKAZE with binary (MLDB) descriptors
    #[value(name = "AKAZE_MLDB")]
    AkazeMldb,
}

impl DescriberMethod {
    /// Name passed to the describer program
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sift => "SIFT",
            Self::AkazeFloat => "AKAZE_FLOAT",
            Self::AkazeMldb => "AKAZE_MLDB",
        }
    }

    /// Region type stored next to the describer settings
    pub fn regions_type(&self) -> &'static str {
        match self {
            Self::Sift => "SIFT_Regions",
            Self::AkazeFloat => "AKAZE_Float_Regions",
            Self::AkazeMldb => "AKAZE_Binary_Regions",
        }
    }
}

/// Describer configuration preset
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DescriberPreset {
    /// Default density
    #[default]
    #[value(name = "NORMAL")]
    Normal,
    /// More features
    #[value(name = "HIGH")]
    High,
    /// Many more features, slow
    #[value(name = "ULTRA")]
    Ultra,
}

impl DescriberPreset {
    /// Name passed to the describer program
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Ultra => "ULTRA",
        }
    }
}

/// How many jobs may run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobsSetting {
    /// No limit configured: run inline, one job at a time, no process isolation
    #[default]
    Sequential,
    /// Let the capacity planner pick the limit from a resource snapshot
    Auto,
    /// Explicit worker limit
    Fixed(NonZeroUsize),
}

impl JobsSetting {
    /// Interpret the raw `-j` value
    pub fn from_arg(jobs: Option<i64>) -> Result<Self> {
        match jobs {
            None => Ok(Self::Sequential),
            Some(0) => Ok(Self::Auto),
            Some(n) if n < 0 => Err(DispatchError::config(format!(
                "Invalid value for -j option ({}), the value must be >= 0",
                n
            ))),
            Some(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Self::Fixed)
                .ok_or_else(|| DispatchError::config(format!("Invalid value for -j option: {}", n))),
        }
    }
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Scene description file
    pub input_file: PathBuf,
    /// Output directory
    pub outdir: PathBuf,
    /// Describer method requested on the command line
    pub method: DescriberMethod,
    /// Upright features
    pub upright: bool,
    /// Recompute even when artifacts exist
    pub force: bool,
    /// Describer preset
    pub preset: DescriberPreset,
    /// Concurrency setting
    pub jobs: JobsSetting,
    /// Memory reserved per job for automatic sizing, in bytes
    pub job_memory: u64,
    /// External describer program
    pub describer_cmd: String,
    /// Temp-file-and-rename artifact writes
    pub atomic: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::new(),
            outdir: PathBuf::new(),
            method: DescriberMethod::Sift,
            upright: false,
            force: false,
            preset: DescriberPreset::Normal,
            jobs: JobsSetting::Sequential,
            job_memory: DEFAULT_JOB_MEMORY,
            describer_cmd: "openMVG_describe".to_string(),
            atomic: false,
        }
    }
}

impl RunConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let jobs = JobsSetting::from_arg(args.jobs)?;

        if args.outdir.as_os_str().is_empty() {
            return Err(DispatchError::config("It is an invalid output directory"));
        }

        let job_memory = parse_size(&args.job_memory)
            .map_err(|e| DispatchError::config(format!("Invalid job memory: {}", e)))?;
        if job_memory == 0 {
            return Err(DispatchError::config("Job memory must be greater than zero"));
        }

        if args.describer_cmd.trim().is_empty() {
            return Err(DispatchError::config("Describer command must not be empty"));
        }

        Ok(Self {
            input_file: args.input_file.clone(),
            outdir: args.outdir.clone(),
            method: args.describer_method,
            upright: args.upright,
            force: args.force,
            preset: args.describer_preset.unwrap_or_default(),
            jobs,
            job_memory,
            describer_cmd: args.describer_cmd.clone(),
            atomic: args.atomic,
        })
    }

    /// The effective invocation, echoed before a run starts
    pub fn invocation(&self) -> String {
        let jobs = match self.jobs {
            JobsSetting::Sequential => "(sequential)".to_string(),
            JobsSetting::Auto => format!(
                "0 (automatic, {} per job)",
                humansize::format_size(self.job_memory, humansize::BINARY)
            ),
            JobsSetting::Fixed(n) => n.to_string(),
        };

        let mut lines = vec![
            "You called:".to_string(),
            format!("--input_file      {}", self.input_file.display()),
            format!("--outdir          {}", self.outdir.display()),
            format!("--describerMethod {}", self.method.as_str()),
            format!("--upright         {}", self.upright),
            format!("--describerPreset {}", self.preset.as_str()),
            format!("--force           {}", self.force),
            format!("--jobs            {}", jobs),
        ];
        if self.atomic {
            lines.push("--atomic          true".to_string());
        }
        lines.join("\n")
    }
}

/// Parse human-readable size string to bytes (binary units)
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let digits = size.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let multiplier = match &size[digits.len()..] {
        "" | "B" => 1u64,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024u64 * 1024 * 1024 * 1024,
        unit => return Err(format!("Unknown size unit: {}", unit)),
    };

    let num: f64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", digits))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", digits));
    }

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["featdispatch", "-i", "scene.json", "-o", "out"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), DEFAULT_JOB_MEMORY);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("12Q").is_err());
    }

    #[test]
    fn test_jobs_setting_from_arg() {
        assert_eq!(JobsSetting::from_arg(None).unwrap(), JobsSetting::Sequential);
        assert_eq!(JobsSetting::from_arg(Some(0)).unwrap(), JobsSetting::Auto);
        assert_eq!(
            JobsSetting::from_arg(Some(3)).unwrap(),
            JobsSetting::Fixed(NonZeroUsize::new(3).unwrap())
        );

        let err = JobsSetting::from_arg(Some(-1)).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains(">= 0"));
    }

    #[test]
    fn test_cli_defaults() {
        let config = RunConfig::from_cli(&args(&[])).unwrap();
        assert_eq!(config.jobs, JobsSetting::Sequential);
        assert_eq!(config.method, DescriberMethod::Sift);
        assert_eq!(config.preset, DescriberPreset::Normal);
        assert_eq!(config.job_memory, DEFAULT_JOB_MEMORY);
        assert!(!config.force);
        assert!(!config.atomic);
    }

    #[test]
    fn test_cli_negative_jobs_rejected() {
        let err = RunConfig::from_cli(&args(&["-j", "-2"])).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_cli_full() {
        let config = RunConfig::from_cli(&args(&[
            "-j", "0", "-m", "AKAZE_MLDB", "-p", "ULTRA", "-u", "-f", "--job-memory", "1G",
        ]))
        .unwrap();
        assert_eq!(config.jobs, JobsSetting::Auto);
        assert_eq!(config.method, DescriberMethod::AkazeMldb);
        assert_eq!(config.preset, DescriberPreset::Ultra);
        assert!(config.upright);
        assert!(config.force);
        assert_eq!(config.job_memory, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_invocation_echo() {
        let config = RunConfig::from_cli(&args(&["-j", "2", "-p", "HIGH"])).unwrap();
        let text = config.invocation();
        assert!(text.starts_with("You called:"));
        assert!(text.contains("--input_file      scene.json"));
        assert!(text.contains("--describerPreset HIGH"));
        assert!(text.contains("--jobs            2"));
        assert!(!text.contains("--atomic"));

        let sequential = RunConfig::from_cli(&args(&[])).unwrap();
        assert!(sequential.invocation().contains("(sequential)"));
    }

    #[test]
    fn test_zero_job_memory_rejected() {
        assert!(RunConfig::from_cli(&args(&["--job-memory", "0"])).is_err());
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&DescriberMethod::AkazeFloat).unwrap();
        assert_eq!(json, "\"AKAZE_FLOAT\"");
        assert_eq!(DescriberMethod::Sift.regions_type(), "SIFT_Regions");
        let preset: DescriberPreset = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(preset, DescriberPreset::High);
    }
}
