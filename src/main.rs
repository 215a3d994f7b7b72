mod cli;
mod config;
mod driver;
mod error;
mod jobs;
mod model;
mod openai;
mod retry;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use cli::Cli;
use config::LmrunConfig;
use driver::JobDriver;
use model::GenerationParams;
use openai::OpenAiClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LmrunConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?
        .with_api_key(cli.token.clone());
    config.init_logging(cli.verbose);

    let policy = config.retry_policy(cli.max_try)?;
    let params = GenerationParams {
        temperature: cli.temperature,
        max_tokens: cli.effective_max_tokens(),
        stop: cli.stop.clone(),
        top_p: cli.top_p,
        disable_eos: cli.disable_eos,
    };

    if config.api_key.is_empty() {
        warn!("no API key set; pass --token or set {}", config::API_KEY_ENV);
    }
    let base_url = cli.base_url.clone().unwrap_or_else(|| config.base_url.clone());
    let client = OpenAiClient::with_base_url(&cli.model, config.api_key.clone(), base_url)?;
    info!(
        model = client.model(),
        family = ?client.family(),
        max_tokens = params.max_tokens,
        max_try = policy.max_try,
        "client ready"
    );

    let driver = JobDriver::new(client, policy, params);
    let summary = driver
        .run(&cli.src, &cli.tgt, cli.max_instance)
        .await
        .with_context(|| format!("run over {} failed", cli.src.display()))?;

    debug!(summary = %serde_json::to_string(&summary)?, "run summary");
    Ok(())
}
