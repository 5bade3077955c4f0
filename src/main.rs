//! # Article Tweet
//!
//! Fetches an article, cleans its text, and asks a hosted language model for
//! a short tweet-style summary validated against a declared schema.
//!
//! ## Usage
//!
//! ```sh
//! article_tweet get --url https://example.com/post > article.txt
//! HF_TOKEN=hf_xxx article_tweet create --url https://example.com/post
//! ```
//!
//! ## Architecture
//!
//! `create` is a strict sequential pipeline:
//! 1. **Fetching**: download the page (retrying 429/5xx) and extract its visible text
//! 2. **Cleaning**: collapse whitespace until a fixed point
//! 3. **Prompting**: render the template with the schema and a seed fragment
//! 4. **Inference**: resolve the model handle and request a completion
//! 5. **Extraction**: repair, parse, and validate the fenced JSON block
//!
//! Only the payload goes to stdout; logs go to stderr.

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod commands;
mod config;
mod error;
mod extract;
mod fetch;
mod http;
mod models;
mod prompt;
mod provider;
mod utils;

use cli::{Cli, Command};
use config::{Settings, load_config};
use error::Result;
use provider::ModelProvider;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter()));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => load_config(path).await?,
        None => Default::default(),
    };
    let mut settings = Settings::from_file(file);

    match &cli.command {
        Command::Get(args) => {
            args.apply(&mut settings);
            let text = commands::get_content_url(args, &settings).await?;
            println!("{text}");
        }
        Command::Create(args) => {
            args.apply(&mut settings);
            let credential = cli.hf_token.clone().or_else(|| settings.hf_token.clone());
            let provider = ModelProvider::new(settings.model_options(), credential);
            let summary = commands::create_from_article(args, &settings, &provider).await?;
            println!("{}", summary.text_summary);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is fine
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli);

    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let start_time = std::time::Instant::now();
    match run(cli).await {
        Ok(()) => {
            info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Execution complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind().as_str(), error = %e, "Execution failed");
            ExitCode::from(e.exit_code())
        }
    }
}
