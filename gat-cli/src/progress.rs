//! Terminal progress bar.

use gat_core::ProgressEvent;
use indicatif::{ProgressBar, ProgressStyle};

pub fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
}

/// Shows download and extraction progress on stderr, unless silent.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(tool: &str, silent: bool) -> Self {
        let bar = if silent {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            bar.set_style(progress_style());
            bar.set_message(tool.to_string());
            bar
        };
        Self { bar }
    }

    /// Sink for the get-tool progress events.
    pub fn sink(&self) -> impl FnMut(ProgressEvent) + Send + 'static {
        let bar = self.bar.clone();
        move |event| bar.set_position(u64::from(event.current))
    }

    pub fn finish(&self, success: bool) {
        if success {
            self.bar.finish_and_clear();
        } else {
            self.bar.abandon();
        }
    }
}
