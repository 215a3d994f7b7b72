//! Configuration loaded from `lmrun.toml`.
//!
//! Everything has a default, so the file is optional. The `OPENAI_API_KEY`
//! environment variable takes precedence over the file for the API key, and
//! command-line flags take precedence over both.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::LmrunError;
use crate::retry::{Markers, RetryPolicy};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LmrunConfig {
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// `max_tokens` used when continuing an interrupted stream.
    #[serde(default = "default_continuation_budget")]
    pub continuation_budget: u32,

    /// Pause after a failed API call, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub markers: Markers,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_continuation_budget() -> u32 {
    3000
}

fn default_backoff_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LmrunConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            continuation_budget: default_continuation_budget(),
            backoff_ms: default_backoff_ms(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            markers: Markers::default(),
        }
    }
}

impl LmrunConfig {
    /// Load from `path`, falling back to defaults if the file does not exist,
    /// then apply the API key from the environment.
    pub fn load(path: &Path) -> Result<Self, LmrunError> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<LmrunConfig>(&contents)?
        } else {
            Self::default()
        };
        Ok(config.with_api_key(std::env::var(API_KEY_ENV).ok()))
    }

    /// Replace the API key when `key` is present and non-empty.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        if let Some(key) = key
            && !key.is_empty()
        {
            self.api_key = key;
        }
        self
    }

    /// Build the retry policy for a run. `max_try` must be at least 1.
    pub fn retry_policy(&self, max_try: u32) -> Result<RetryPolicy, LmrunError> {
        if max_try == 0 {
            return Err(LmrunError::Config("max_try must be at least 1".into()));
        }
        if self.markers.complete_stop.iter().any(String::is_empty)
            || self.markers.skip.iter().any(String::is_empty)
        {
            return Err(LmrunError::Config("markers must not be empty strings".into()));
        }
        Ok(RetryPolicy {
            max_try,
            continuation_budget: self.continuation_budget,
            backoff: Duration::from_millis(self.backoff_ms),
            markers: self.markers.clone(),
        })
    }

    /// Install the global tracing subscriber. `RUST_LOG` wins over the
    /// configured level; `verbose` forces `debug`.
    pub fn init_logging(&self, verbose: bool) {
        let level = if verbose { "debug" } else { self.log_level.as_str() };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        match self.log_format.as_str() {
            "json" => {
                fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            _ => {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
    }
}
