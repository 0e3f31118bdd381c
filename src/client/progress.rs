//! Progress reporting for the client sync.
//!
//! The engine calls `report` once per processed file. Implementations must
//! be cheap and must not block.

use indicatif::{ProgressBar, ProgressStyle};

pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, label: &str);

    fn finish(&self) {}
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn report(&self, percent: u8, label: &str) {
        self(percent, label)
    }
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8, _label: &str) {}
}

/// Terminal progress bar
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBarSink {
    fn report(&self, percent: u8, label: &str) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(label.to_string());
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Percentage of `processed` out of `total`, capped at 100.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.saturating_mul(100) / total).min(100) as u8
}
