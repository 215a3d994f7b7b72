//! Bounded retry loop that turns one prompt into one generated text.
//!
//! Every attempt is a streaming call. Its result is classified into an
//! [`AttemptOutcome`], and the outcome decides what the next attempt looks
//! like:
//!
//! - complete-stop marker or clean finish: accept and stop
//! - skip marker: throw the text away, ask again with the same request
//! - interrupted stream: keep the text, append it to the prompt and continue
//!   with the continuation budget
//! - transport error: back off; halve `max_tokens` if the context overflowed
//!
//! The loop never runs more than [`RetryPolicy::max_try`] attempts.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::model::{GenerationParams, LanguageModel, StreamOutput};

/// Phrases that classify generated text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Markers {
    /// The model reached its own final answer.
    #[serde(default = "default_complete_stop")]
    pub complete_stop: Vec<String>,
    /// The model elided intermediate steps instead of writing them out.
    #[serde(default = "default_skip")]
    pub skip: Vec<String>,
}

fn default_complete_stop() -> Vec<String> {
    vec!["\n\nThe final".to_string()]
}

fn default_skip() -> Vec<String> {
    vec![
        "and so on...".to_string(),
        "Continue the procedure".to_string(),
        "Continue the steps until".to_string(),
    ]
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            complete_stop: default_complete_stop(),
            skip: default_skip(),
        }
    }
}

impl Markers {
    pub fn is_complete(&self, text: &str) -> bool {
        self.complete_stop.iter().any(|m| text.contains(m.as_str()))
    }

    pub fn skips_steps(&self, text: &str) -> bool {
        self.skip.iter().any(|m| text.contains(m.as_str()))
    }
}

/// Knobs of the retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts per prompt. At least 1.
    pub max_try: u32,
    /// `max_tokens` used when continuing an interrupted stream.
    pub continuation_budget: u32,
    /// Pause after a transport error.
    pub backoff: Duration,
    pub markers: Markers,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_try: 8,
            continuation_budget: 3000,
            backoff: Duration::from_secs(10),
            markers: Markers::default(),
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The text carries a complete-stop marker.
    Completed,
    /// The stream finished cleanly without any marker.
    Accepted,
    /// The model skipped steps; the text is discarded.
    SkippedSteps,
    /// The stream broke off; the text is kept and generation continues.
    Truncated,
    /// The call failed before producing a body.
    TransportError {
        message: String,
        context_overflow: bool,
    },
}

impl AttemptOutcome {
    /// True when the job resolves with this attempt.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Completed | AttemptOutcome::Accepted)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Completed => write!(f, "final answer reached"),
            AttemptOutcome::Accepted => write!(f, "completed"),
            AttemptOutcome::SkippedSteps => write!(f, "the model skipped steps"),
            AttemptOutcome::Truncated => write!(f, "incomplete output"),
            AttemptOutcome::TransportError {
                message,
                context_overflow: true,
            } => write!(f, "context length exceeded: {message}"),
            AttemptOutcome::TransportError { message, .. } => write!(f, "API failure: {message}"),
        }
    }
}

/// Classify a finished stream. Checks run in a fixed order: complete-stop
/// marker, then skip marker, then interruption.
pub fn classify(output: &StreamOutput, markers: &Markers) -> AttemptOutcome {
    if markers.is_complete(&output.text) {
        AttemptOutcome::Completed
    } else if markers.skips_steps(&output.text) {
        AttemptOutcome::SkippedSteps
    } else if output.interrupted {
        AttemptOutcome::Truncated
    } else {
        AttemptOutcome::Accepted
    }
}

/// One attempt as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_try: u32,
    /// `max_tokens` the attempt was made with.
    pub max_tokens: u32,
    pub outcome: AttemptOutcome,
    /// Length of the text the attempt produced, in chars.
    pub chars: usize,
}

/// Final result of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    /// False when every attempt was used up without acceptance. `text` then
    /// holds the best partial output.
    pub succeeded: bool,
    pub attempts: Vec<AttemptRecord>,
}

// Lives for the duration of one `resolve` call.
struct RetryState {
    attempts_remaining: u32,
    accumulated: String,
    prompt: String,
    max_tokens: u32,
    // Text of the most recent skipped attempt, used only if attempts run out.
    discarded: Option<String>,
}

impl RetryState {
    fn new(prompt: &str, max_tokens: u32, max_try: u32) -> Self {
        Self {
            attempts_remaining: max_try.max(1),
            accumulated: String::new(),
            prompt: prompt.to_string(),
            max_tokens,
            discarded: None,
        }
    }

    fn continue_with(&mut self, text: &str, budget: u32) {
        self.prompt.push_str(text);
        self.accumulated.push_str(text);
        self.max_tokens = budget;
        self.discarded = None;
    }

    fn shrink(&mut self) {
        self.max_tokens = (self.max_tokens / 2).max(1);
    }

    fn exhausted(self) -> String {
        let mut text = self.accumulated;
        if let Some(last) = self.discarded {
            text.push_str(&last);
        }
        text
    }
}

/// Drive `model` until the prompt resolves or `policy.max_try` attempts are
/// spent. `on_chunk` sees streamed text as it arrives, `on_attempt` every
/// attempt as soon as it is classified.
pub async fn resolve<M, C, F>(
    model: &M,
    prompt: &str,
    policy: &RetryPolicy,
    params: &GenerationParams,
    mut on_chunk: C,
    mut on_attempt: F,
) -> Resolution
where
    M: LanguageModel,
    C: FnMut(&str),
    F: FnMut(&AttemptRecord),
{
    let max_try = policy.max_try.max(1);
    let mut state = RetryState::new(prompt, params.max_tokens, max_try);
    let mut attempts = Vec::new();

    while state.attempts_remaining > 0 {
        state.attempts_remaining -= 1;
        let call = GenerationParams {
            max_tokens: state.max_tokens,
            ..params.clone()
        };

        let (outcome, text) = match model
            .infer_stream(&state.prompt, &call, &mut on_chunk)
            .await
        {
            Ok(output) => (classify(&output, &policy.markers), output.text),
            Err(err) => (
                AttemptOutcome::TransportError {
                    context_overflow: err.is_context_length_exceeded(),
                    message: err.to_string(),
                },
                String::new(),
            ),
        };

        let record = AttemptRecord {
            attempt: max_try - state.attempts_remaining,
            max_try,
            max_tokens: call.max_tokens,
            outcome,
            chars: text.chars().count(),
        };
        log_attempt(&record);
        on_attempt(&record);
        let outcome = record.outcome.clone();
        attempts.push(record);

        match outcome {
            AttemptOutcome::Completed | AttemptOutcome::Accepted => {
                state.accumulated.push_str(&text);
                return Resolution {
                    text: state.accumulated,
                    succeeded: true,
                    attempts,
                };
            }
            AttemptOutcome::SkippedSteps => {
                state.discarded = Some(text);
            }
            AttemptOutcome::Truncated => {
                state.continue_with(&text, policy.continuation_budget);
            }
            AttemptOutcome::TransportError {
                context_overflow, ..
            } => {
                if context_overflow {
                    state.shrink();
                }
                if state.attempts_remaining > 0 {
                    debug!(backoff_ms = policy.backoff.as_millis() as u64, "backing off");
                    sleep(policy.backoff).await;
                }
            }
        }
    }

    warn!(attempts = attempts.len(), "attempts exhausted without an accepted answer");
    Resolution {
        text: state.exhausted(),
        succeeded: false,
        attempts,
    }
}

fn log_attempt(record: &AttemptRecord) {
    match &record.outcome {
        AttemptOutcome::TransportError { .. } => warn!(
            attempt = record.attempt,
            max_try = record.max_try,
            max_tokens = record.max_tokens,
            "{}",
            record.outcome
        ),
        outcome => info!(
            attempt = record.attempt,
            max_try = record.max_try,
            max_tokens = record.max_tokens,
            chars = record.chars,
            "{outcome}"
        ),
    }
}
