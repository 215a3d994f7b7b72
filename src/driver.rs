use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::error::LmrunError;
use crate::jobs::{OutputWriter, count_checkpoint, load_jobs, score};
use crate::model::{GenerationParams, LanguageModel};
use crate::retry::{RetryPolicy, resolve};
use crate::ui::RunProgress;

/// Totals for one run over a job file.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Jobs skipped because the output file already had their results.
    pub skipped: usize,
    pub processed: usize,
    /// Jobs resolved before running out of attempts.
    pub succeeded: usize,
    /// Jobs that carried a reference answer.
    pub scored: usize,
    pub correct: usize,
}

impl RunSummary {
    /// Share of scored jobs that were correct, if any were scored.
    pub fn accuracy(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.correct as f64 / self.scored as f64)
    }
}

/// Runs every pending job of a file through the retry loop, one at a time.
pub struct JobDriver<M> {
    model: M,
    policy: RetryPolicy,
    params: GenerationParams,
    /// Draw progress and echo results to the terminal.
    pub interactive: bool,
}

impl<M: LanguageModel> JobDriver<M> {
    pub fn new(model: M, policy: RetryPolicy, params: GenerationParams) -> Self {
        Self {
            model,
            policy,
            params,
            interactive: true,
        }
    }

    /// Process the jobs of `src` that have no result in `tgt` yet, up to
    /// `max_instance` jobs of the file in total, appending each result to
    /// `tgt` as soon as it resolves.
    pub async fn run(
        &self,
        src: &Path,
        tgt: &Path,
        max_instance: Option<usize>,
    ) -> Result<RunSummary, LmrunError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let jobs = load_jobs(src)?;
        let checkpoint = count_checkpoint(tgt)?;
        let end = jobs.len().min(max_instance.unwrap_or(usize::MAX));
        let start = checkpoint.min(end);
        let mut writer = OutputWriter::open(tgt)?;

        info!(
            %run_id,
            jobs = jobs.len(),
            checkpoint,
            pending = end - start,
            "starting run"
        );

        let progress = if self.interactive {
            RunProgress::start((end - start) as u64)
        } else {
            RunProgress::hidden()
        };

        let mut summary = RunSummary {
            run_id,
            started_at,
            completed_at: started_at,
            skipped: start,
            processed: 0,
            succeeded: 0,
            scored: 0,
            correct: 0,
        };

        for (index, job) in jobs.iter().enumerate().take(end).skip(start) {
            progress.begin_job(index);
            let resolution = resolve(
                &self.model,
                &job.input,
                &self.policy,
                &self.params,
                |chunk| progress.chunk(chunk),
                |r| progress.attempt(r),
            )
            .instrument(info_span!("job", index = index + 1))
            .await;

            writer.append(&resolution.text)?;

            let reference = job.reference();
            let correct = reference.as_deref().map(|r| score(r, &resolution.text));

            summary.processed += 1;
            if resolution.succeeded {
                summary.succeeded += 1;
            }
            if let Some(correct) = correct {
                summary.scored += 1;
                if correct {
                    summary.correct += 1;
                }
            }

            progress.finish_job(index, &resolution, reference.as_deref(), correct);
        }

        summary.completed_at = Utc::now();
        progress.finish(&summary);
        info!(
            %run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            "run finished"
        );
        Ok(summary)
    }
}
