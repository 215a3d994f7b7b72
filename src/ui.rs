//! Terminal output: a progress bar over pending jobs, colored attempt lines,
//! and the generated text of each job as it streams in.

use std::cell::RefCell;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::driver::RunSummary;
use crate::retry::{AttemptOutcome, AttemptRecord, Resolution};

/// Progress display for one run.
pub struct RunProgress {
    pb: ProgressBar,
    // Whether text is printed at all; off for hidden runs.
    echo: bool,
    // Streamed text not yet printed because its line is still open.
    partial: RefCell<String>,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl RunProgress {
    /// Show a bar for `pending` jobs.
    pub fn start(pending: u64) -> Self {
        let pb = ProgressBar::new(pending);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
                )
                .expect("invalid template")
                .progress_chars("=>-"),
        );
        Self::with_bar(pb, true)
    }

    /// Draws and prints nothing.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden(), false)
    }

    fn with_bar(pb: ProgressBar, echo: bool) -> Self {
        Self {
            pb,
            echo,
            partial: RefCell::new(String::new()),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    fn print(&self, line: String) {
        if self.echo {
            self.pb.suspend(|| println!("{line}"));
        }
    }

    /// Echo streamed text line by line, so the bar is only redrawn between
    /// complete lines.
    pub fn chunk(&self, text: &str) {
        if !self.echo {
            return;
        }
        let mut partial = self.partial.borrow_mut();
        partial.push_str(text);
        while let Some(pos) = partial.find('\n') {
            let line: String = partial.drain(..=pos).collect();
            self.print(line.trim_end_matches('\n').to_string());
        }
    }

    fn end_stream(&self) {
        let rest = std::mem::take(&mut *self.partial.borrow_mut());
        if !rest.is_empty() {
            self.print(rest);
        }
    }

    /// Mark the start of a job. `index` is the job's position in the file.
    pub fn begin_job(&self, index: usize) {
        self.pb.set_message(format!("job #{}", index + 1));
    }

    /// Report a finished attempt. Accepting attempts are reported by
    /// [`RunProgress::finish_job`] instead.
    pub fn attempt(&self, record: &AttemptRecord) {
        self.end_stream();
        if record.outcome.is_accepted() {
            return;
        }
        let style = match record.outcome {
            AttemptOutcome::TransportError { .. } => &self.red,
            _ => &self.yellow,
        };
        self.print(format!(
            "  {} Attempt {}/{} (max_tokens {}): {}",
            style.apply_to("↻"),
            record.attempt,
            record.max_try,
            record.max_tokens,
            record.outcome
        ));
    }

    /// Print the attempt count, the reference and the verdict of a job. The
    /// text itself was echoed while it streamed.
    pub fn finish_job(
        &self,
        index: usize,
        resolution: &Resolution,
        reference: Option<&str>,
        correct: Option<bool>,
    ) {
        let mark = if resolution.succeeded {
            self.green.apply_to("✓")
        } else {
            self.red.apply_to("✗")
        };
        self.print(format!(
            "{mark} job #{} ({} attempt(s))",
            index + 1,
            resolution.attempts.len()
        ));
        if let Some(reference) = reference {
            self.print(format!("{} {reference}", self.dim.apply_to("reference:")));
        }
        if let Some(correct) = correct {
            let verdict = if correct {
                self.green.apply_to("correct")
            } else {
                self.red.apply_to("incorrect")
            };
            self.print(format!("{verdict}"));
        }
        self.pb.inc(1);
    }

    /// Clear the bar and print run totals.
    pub fn finish(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        if !self.echo {
            return;
        }
        println!();
        println!("{}", self.green.apply_to("─── Run Summary ───"));
        println!(
            "processed {} job(s), skipped {} already done, {} resolved, {} exhausted",
            summary.processed,
            summary.skipped,
            summary.succeeded,
            summary.processed - summary.succeeded
        );
        if let Some(accuracy) = summary.accuracy() {
            println!(
                "accuracy {:.2}% ({}/{})",
                accuracy * 100.0,
                summary.correct,
                summary.scored
            );
        }
    }
}
