//! Error types for the article-to-tweet pipeline.
//!
//! Every component returns [`AppError`]. Variants carry enough context for a
//! single diagnostic line; [`AppError::kind`] groups them into the coarse
//! categories that decide the process exit code in `main`.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse error category used for exit codes and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    Fetch,
    Template,
    Extraction,
    SchemaValidation,
    Provider,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "input_validation",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Template => "template",
            ErrorKind::Extraction => "extraction",
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::Provider => "provider",
            ErrorKind::Config => "config",
        }
    }
}

/// Main error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// URL could not be parsed or does not use http(s).
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A command argument is out of range or inconsistent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The article server answered with a non-success status.
    #[error("Failed to fetch '{url}': HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    /// The article request never produced a response.
    #[error("Failed to fetch '{url}': {source}")]
    FetchTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The template lacks a placeholder the pipeline must fill.
    #[error("Template is missing the required placeholder '{{{{{placeholder}}}}}'")]
    MissingPlaceholder { placeholder: &'static str },

    /// The template references variables that have no value.
    #[error("Template references unresolved placeholders: {}", names.join(", "))]
    UnresolvedPlaceholder { names: Vec<String> },

    /// The template engine rejected the template.
    #[error("Template rendering failed: {0}")]
    Render(#[from] minijinja::Error),

    /// An extraction task was declared without any field.
    #[error("Extraction task '{0}' declares no fields")]
    EmptyTask(String),

    /// The model output contains no closed fenced block.
    #[error("No fenced block found in model output")]
    NoFencedBlock,

    /// The fenced block is not valid JSON.
    #[error("Fenced block is not valid JSON: {source}")]
    UnparseableBlock {
        #[source]
        source: serde_json::Error,
    },

    /// The JSON parsed but does not conform to the declared fields.
    #[error("Output does not match schema '{task}': {reason}")]
    SchemaValidation { task: String, reason: String },

    /// No bearer token was supplied.
    #[error("Missing Hugging Face token; pass --hf-token or set env[{env_var}]")]
    MissingCredential { env_var: String },

    /// The inference endpoint answered with an error.
    #[error("Model '{model}' failed with HTTP {status}: {message}")]
    ProviderStatus {
        model: String,
        status: u16,
        message: String,
    },

    /// The inference request never produced a response.
    #[error("Model '{model}' request failed: {source}")]
    ProviderTransport {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    /// The inference endpoint answered with an unexpected body.
    #[error("Model '{model}' returned an unexpected response: {message}")]
    ProviderResponse { model: String, message: String },

    /// The configuration file could not be read or parsed.
    #[error("Configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// Filesystem errors outside configuration loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidUrl { .. } | AppError::InvalidArgument(_) => ErrorKind::InputValidation,
            AppError::FetchStatus { .. } | AppError::FetchTransport { .. } => ErrorKind::Fetch,
            AppError::MissingPlaceholder { .. }
            | AppError::UnresolvedPlaceholder { .. }
            | AppError::Render(_)
            | AppError::EmptyTask(_) => ErrorKind::Template,
            AppError::NoFencedBlock | AppError::UnparseableBlock { .. } => ErrorKind::Extraction,
            AppError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            AppError::MissingCredential { .. }
            | AppError::ProviderStatus { .. }
            | AppError::ProviderTransport { .. }
            | AppError::ProviderResponse { .. } => ErrorKind::Provider,
            AppError::Config { .. } | AppError::Io(_) => ErrorKind::Config,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => 1,
            ErrorKind::InputValidation => 2,
            ErrorKind::Fetch => 3,
            ErrorKind::Template => 4,
            ErrorKind::Extraction => 5,
            ErrorKind::SchemaValidation => 6,
            ErrorKind::Provider => 7,
        }
    }

    /// Whether a re-prompt could plausibly fix this error.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Extraction | ErrorKind::SchemaValidation
        )
    }
}

/// Result type alias for [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
