//! Job file input, result file output, and scoring against references.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::LmrunError;

/// One line of the job file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Job {
    pub input: String,
    /// Reference answer; any JSON scalar.
    #[serde(default)]
    pub output: Option<Value>,
}

impl Job {
    /// The reference answer as text, if the job has one.
    pub fn reference(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Read every job from a JSONL file. Blank lines are skipped; any other line
/// that is not a job object aborts the load.
pub fn load_jobs(path: &Path) -> Result<Vec<Job>, LmrunError> {
    let reader = BufReader::new(File::open(path)?);
    let mut jobs = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let value: Value = serde_json::from_str(&line).map_err(|source| LmrunError::JobParse {
            line: line_no,
            source,
        })?;
        if !value.get("input").is_some_and(Value::is_string) {
            return Err(LmrunError::MissingInput { line: line_no });
        }
        let job = serde_json::from_value(value).map_err(|source| LmrunError::JobParse {
            line: line_no,
            source,
        })?;
        jobs.push(job);
    }

    Ok(jobs)
}

/// Number of results already written to `path`. A missing file counts as zero.
/// Only newline-terminated lines count; a partial last line is a write that
/// never finished, and [`OutputWriter::open`] discards it.
pub fn count_checkpoint(path: &Path) -> Result<usize, LmrunError> {
    let contents = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    Ok(contents.iter().filter(|&&b| b == b'\n').count())
}

// Length of `contents` up to and including its last newline.
fn complete_len(contents: &[u8]) -> usize {
    contents.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1)
}

/// Appends one JSON-encoded string per job to the result file.
pub struct OutputWriter {
    out: BufWriter<File>,
}

impl OutputWriter {
    /// Open `path` for appending, creating it if needed. A partial last line
    /// left by an interrupted write is cut off first.
    pub fn open(path: &Path) -> Result<Self, LmrunError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let keep = complete_len(&contents);
        if keep < contents.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - keep,
                "discarding partial last line of output file"
            );
            file.set_len(keep as u64)?;
        }
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Write one result and flush, so the file is a valid checkpoint after
    /// every job.
    pub fn append(&mut self, text: &str) -> Result<(), LmrunError> {
        let line = serde_json::to_string(text)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Whether `output` contains the reference answer. A single-line reference
/// must appear on the last line of the output; a multi-line one anywhere.
pub fn score(reference: &str, output: &str) -> bool {
    if reference.contains('\n') {
        output.contains(reference)
    } else {
        output.rsplit('\n').next().unwrap_or("").contains(reference)
    }
}
