//! Command-line interface.
//!
//! One command: run every pending job of `--src` through the model and append
//! the results to `--tgt`.

use std::path::PathBuf;

use clap::Parser;

/// Run prompts from a JSONL job file through a completion model, recovering
/// from truncated or step-skipping generations.
#[derive(Debug, Parser)]
#[command(name = "lmrun", version, about)]
pub struct Cli {
    /// Model identifier.
    #[arg(long, default_value = "gpt-4")]
    pub model: String,

    /// Job file: one JSON object per line with `input` and optional `output`.
    #[arg(long)]
    pub src: PathBuf,

    /// Output file: one JSON string per line. Also the resume checkpoint.
    #[arg(long)]
    pub tgt: PathBuf,

    /// Stop sequences passed to the model.
    #[arg(long, num_args = 1..)]
    pub stop: Vec<String>,

    /// Maximum attempts per job.
    #[arg(long, default_value_t = 8)]
    pub max_try: u32,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    #[arg(long, default_value_t = 1.0)]
    pub top_p: f32,

    /// Suppress the end-of-text token.
    #[arg(long, default_value_t = false)]
    pub disable_eos: bool,

    /// Generation length cap. Defaults to 3333 for gpt-4 models and 2700 otherwise.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stop after this many jobs of the file (counting already-processed ones).
    #[arg(long)]
    pub max_instance: Option<usize>,

    /// API key. Overrides `OPENAI_API_KEY` and the config file.
    #[arg(long)]
    pub token: Option<String>,

    /// Base URL of an OpenAI-compatible service.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Configuration file.
    #[arg(long, default_value = "lmrun.toml")]
    pub config: PathBuf,

    /// Debug-level logging.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// `--max-tokens`, or the per-model default.
    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(if self.model.starts_with("gpt-4") {
            3333
        } else {
            2700
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["lmrun", "--src", "jobs.jsonl", "--tgt", "out.jsonl"]);
        assert_eq!(cli.model, "gpt-4");
        assert_eq!(cli.src, PathBuf::from("jobs.jsonl"));
        assert_eq!(cli.max_try, 8);
        assert_eq!(cli.temperature, 0.7);
        assert_eq!(cli.top_p, 1.0);
        assert!(!cli.disable_eos);
        assert!(cli.stop.is_empty());
        assert!(cli.max_instance.is_none());
        assert_eq!(cli.config, PathBuf::from("lmrun.toml"));
    }

    #[test]
    fn cli_parses_all_flags() {
        let cli = Cli::parse_from([
            "lmrun",
            "--model",
            "text-davinci-003",
            "--src",
            "a.jsonl",
            "--tgt",
            "b.jsonl",
            "--stop",
            "\n\n",
            "Q:",
            "--max-try",
            "3",
            "--temperature",
            "0",
            "--top-p",
            "0.9",
            "--disable-eos",
            "--max-tokens",
            "512",
            "--max-instance",
            "10",
            "--token",
            "sk-x",
            "--verbose",
        ]);
        assert_eq!(cli.stop, vec!["\n\n", "Q:"]);
        assert_eq!(cli.max_try, 3);
        assert_eq!(cli.top_p, 0.9);
        assert!(cli.disable_eos);
        assert_eq!(cli.effective_max_tokens(), 512);
        assert_eq!(cli.max_instance, Some(10));
        assert_eq!(cli.token.as_deref(), Some("sk-x"));
        assert!(cli.verbose);
    }

    #[test]
    fn max_tokens_default_depends_on_model() {
        let gpt4 = Cli::parse_from(["lmrun", "--src", "a", "--tgt", "b"]);
        assert_eq!(gpt4.effective_max_tokens(), 3333);
        let turbo = Cli::parse_from([
            "lmrun",
            "--model",
            "gpt-3.5-turbo",
            "--src",
            "a",
            "--tgt",
            "b",
        ]);
        assert_eq!(turbo.effective_max_tokens(), 2700);
    }

    #[test]
    fn cli_requires_src_and_tgt() {
        assert!(Cli::try_parse_from(["lmrun", "--src", "a"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
