//! Progress reporter implementation
//!
//! Uses indicatif for a single bar over the scene's views plus a status
//! line. Views count as processed once they are dispatched or skipped;
//! workers may still be running when the bar fills.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress reporter for a batch run
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Views progress bar
    views_bar: ProgressBar,
    /// Current status message
    status: ProgressBar,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let views_bar = multi.add(ProgressBar::new(0));
        views_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} views ({percent}%, {elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        views_bar.set_prefix("EXTRACT FEATURES");

        Self {
            multi,
            views_bar,
            status,
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set total views
    pub fn set_total(&self, total: u64) {
        self.views_bar.set_length(total);
    }

    /// Count a view handed to the dispatcher
    pub fn view_dispatched(&self) {
        self.views_bar.inc(1);
    }

    /// Count views skipped because their artifacts exist
    pub fn views_skipped(&self, count: u64) {
        if count > 0 {
            self.views_bar.inc(count);
        }
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.views_bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.views_bar.abandon();
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());

        reporter.set_total(8);
        reporter.view_dispatched();
        reporter.view_dispatched();
        reporter.views_skipped(2);
        reporter.views_skipped(0);

        assert_eq!(reporter.views_bar.position(), 4);
        assert_eq!(reporter.views_bar.length(), Some(8));

        reporter.finish_success("done");
        assert!(reporter.views_bar.is_finished());
    }
}
