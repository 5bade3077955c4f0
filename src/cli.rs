//! Command-line interface definitions.
//!
//! Every option that also exists in the configuration file is an `Option`
//! here, so an absent flag falls through to the file and then to the
//! built-in default.

use crate::config::Settings;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Summarize an article into a tweet with a hosted language model.
///
/// # Examples
///
/// ```sh
/// # Print the cleaned text of an article
/// article_tweet get --url https://example.com/post > article.txt
///
/// # Generate a tweet-style summary
/// HF_TOKEN=hf_xxx article_tweet create --url https://example.com/post
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about, arg_required_else_help = true)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Access token for the Hugging Face inference API
    #[arg(long, env = "HF_TOKEN", hide_env_values = true, global = true)]
    pub hf_token: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the cleaned text content of an article
    Get(GetArgs),
    /// Generate a tweet-style summary of an article
    Create(CreateArgs),
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// URL of the article to extract the content from
    #[arg(long)]
    pub url: String,

    /// Maximum number of cleanup passes over the extracted text
    #[arg(long)]
    pub limit_clean: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// URL of the article to summarize
    #[arg(long)]
    pub url: String,

    /// Hugging Face model ID to use
    #[arg(long)]
    pub model_id: Option<String>,

    /// Maximum number of tokens to generate
    #[arg(long)]
    pub max_new_tokens: Option<u32>,

    /// Language of the summary
    #[arg(long)]
    pub language: Option<String>,

    /// Extra task query passed to templates that use one
    #[arg(long)]
    pub query: Option<String>,

    /// Path to a custom prompt template
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Total model calls allowed when the output does not validate
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Maximum number of cleanup passes over the extracted text
    #[arg(long)]
    pub limit_clean: Option<usize>,

    /// Quantization of a locally loaded model (ignored by the remote backend)
    #[arg(long, value_enum)]
    pub quantization: Option<Quantization>,

    /// Load the model locally (ignored by the remote backend)
    #[arg(long)]
    pub local: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    Q4,
    Q8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl GetArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(limit) = self.limit_clean {
            settings.limit_clean = limit;
        }
    }
}

impl CreateArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(model_id) = &self.model_id {
            settings.model_id = model_id.clone();
        }
        if let Some(tokens) = self.max_new_tokens {
            settings.max_new_tokens = tokens;
        }
        if let Some(language) = &self.language {
            settings.language = language.clone();
        }
        if let Some(template) = &self.template {
            settings.template = Some(template.clone());
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_attempts = attempts;
        }
        if let Some(limit) = self.limit_clean {
            settings.limit_clean = limit;
        }
    }
}
