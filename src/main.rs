//! featdispatch CLI - Batch Feature Extraction
//!
//! Describes every view of a scene with an external describer, in bounded
//! parallel worker processes.

use clap::Parser;
use featdispatch::batch::FeatureEngine;
use featdispatch::config::{CliArgs, JobsSetting, RunConfig};
use featdispatch::error::Result;
use featdispatch::progress::ProgressReporter;
use featdispatch::system::default_probe;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if args.quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Build configuration; rejects bad values before any work
    let config = RunConfig::from_cli(&args)?;

    // Echo the invocation unless quiet
    if !args.quiet {
        println!("{}", config.invocation());
        if args.verbose > 0 {
            println!("--describer-cmd   {}", config.describer_cmd);
        }
        println!();
    }

    if args.verbose > 0 && config.jobs == JobsSetting::Auto {
        default_probe().snapshot().print_summary();
        println!();
    }

    // Create progress reporter
    let progress = if args.quiet {
        ProgressReporter::disabled()
    } else if args.progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::disabled()
    };

    let summary = FeatureEngine::new(config).with_progress(progress).execute()?;

    // Print results
    if !args.quiet {
        summary.print_summary();
    }

    Ok(())
}
