use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress and timing sink owned by the orchestrator. Everything here goes
/// to stderr and is suppressed entirely unless the run is verbose, so the
/// report stream stays clean.
pub struct Progress {
    verbose: bool,
    mark: Option<Instant>,
}

impl Progress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            mark: None,
        }
    }

    /// Start (or restart) the stage clock without reporting anything.
    pub fn start(&mut self) {
        self.mark = Some(Instant::now());
    }

    /// Report a completed stage with the time since the previous mark, then
    /// restart the clock.
    pub fn stage(&mut self, legend: &str) {
        if let Some(mark) = self.mark {
            if self.verbose {
                let secs = mark.elapsed().as_secs();
                eprintln!(
                    "% {legend}: {}h {}m {}s",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                );
            }
        }
        self.mark = Some(Instant::now());
    }

    /// One-off diagnostic line.
    pub fn note(&self, msg: &str) {
        if self.verbose {
            eprintln!("% {msg}");
        }
    }

    /// Per-item progress bar; hidden when not verbose.
    pub fn bar(&self, len: u64, msg: String) -> ProgressBar {
        if !self.verbose {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .unwrap()
                .progress_chars("=> "),
        );
        bar.set_message(msg);
        bar
    }

    /// Spinner for work with no known item count; hidden when not verbose.
    pub fn spinner(&self, msg: String) -> ProgressBar {
        if !self.verbose {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner.set_message(msg);
        spinner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_mode_yields_hidden_bars() {
        let progress = Progress::new(false);
        assert!(progress.bar(10, "x".into()).is_hidden());
        assert!(progress.spinner("y".into()).is_hidden());
    }

    #[test]
    fn stage_marks_do_not_panic_without_start() {
        let mut progress = Progress::new(true);
        progress.stage("nothing yet");
        progress.start();
        progress.stage("after start");
    }
}
