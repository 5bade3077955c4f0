//! Configuration file loading and layered settings.
//!
//! Values come from three layers, highest priority first:
//!
//! 1. command-line flags
//! 2. the YAML file passed with `--config`
//! 3. built-in defaults
//!
//! ```yaml
//! model_id: mistralai/Mistral-7B-Instruct-v0.3
//! limit_clean: 100
//! max_new_tokens: 512
//! inference_endpoint: https://api-inference.huggingface.co/models
//! timeout_secs: 60
//! max_retries: 3
//! max_attempts: 1
//! language: English
//! template: ./templates/task.jinja2
//! ```

use crate::error::{AppError, Result};
use crate::http::RetryPolicy;
use crate::provider::{DEFAULT_CREDENTIAL_ENV, DEFAULT_ENDPOINT, ModelOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_MODEL_ID: &str = "mistralai/Mistral-7B-Instruct-v0.3";
pub const DEFAULT_LIMIT_CLEAN: usize = 100;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 512;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_LANGUAGE: &str = "English";

/// Contents of the optional YAML file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model_id: Option<String>,
    pub hf_token: Option<String>,
    pub limit_clean: Option<usize>,
    pub max_new_tokens: Option<u32>,
    pub inference_endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_attempts: Option<usize>,
    pub template: Option<PathBuf>,
    pub language: Option<String>,
    pub system_ack: Option<String>,
    pub user_agent: Option<String>,
}

/// Read and parse a YAML configuration file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config(path: &Path) -> Result<FileConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    parse_config(path, &raw)
}

fn parse_config(path: &Path, raw: &str) -> Result<FileConfig> {
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    let config: FileConfig = serde_yaml::from_str(raw).map_err(|e| AppError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(?config.model_id, ?config.template, "Loaded configuration");
    Ok(config)
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_id: String,
    pub hf_token: Option<String>,
    pub limit_clean: usize,
    pub max_new_tokens: u32,
    pub inference_endpoint: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub max_attempts: usize,
    pub template: Option<PathBuf>,
    pub language: String,
    pub system_ack: Option<String>,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            hf_token: None,
            limit_clean: DEFAULT_LIMIT_CLEAN,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            inference_endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            max_attempts: 1,
            template: None,
            language: DEFAULT_LANGUAGE.to_string(),
            system_ack: None,
            user_agent: concat!("article_tweet/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    /// Defaults overridden by whatever the file sets.
    pub fn from_file(file: FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            model_id: file.model_id.unwrap_or(defaults.model_id),
            hf_token: file.hf_token,
            limit_clean: file.limit_clean.unwrap_or(defaults.limit_clean),
            max_new_tokens: file.max_new_tokens.unwrap_or(defaults.max_new_tokens),
            inference_endpoint: file.inference_endpoint.unwrap_or(defaults.inference_endpoint),
            timeout: file.timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
            template: file.template,
            language: file.language.unwrap_or(defaults.language),
            system_ack: file.system_ack,
            user_agent: file.user_agent.unwrap_or(defaults.user_agent),
        }
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.limit_clean == 0 {
            return Err(AppError::InvalidArgument("limit_clean must be at least 1".to_string()));
        }
        if self.max_new_tokens == 0 {
            return Err(AppError::InvalidArgument("max_new_tokens must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::InvalidArgument("max_attempts must be at least 1".to_string()));
        }
        if self.model_id.trim().is_empty() {
            return Err(AppError::InvalidArgument("model_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(1))
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            endpoint: self.inference_endpoint.clone(),
            max_new_tokens: self.max_new_tokens,
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            retry: self.retry_policy(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_file(FileConfig::default());
        assert_eq!(settings.model_id, DEFAULT_MODEL_ID);
        assert_eq!(settings.limit_clean, 100);
        assert_eq!(settings.max_new_tokens, 512);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.language, "English");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let raw = "model_id: org/small-model\nlimit_clean: 10\ntimeout_secs: 5\nlanguage: French\n";
        let file = parse_config(Path::new("config.yaml"), raw).unwrap();
        let settings = Settings::from_file(file);
        assert_eq!(settings.model_id, "org/small-model");
        assert_eq!(settings.limit_clean, 10);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.language, "French");
        assert_eq!(settings.max_new_tokens, DEFAULT_MAX_NEW_TOKENS);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config(Path::new("config.yaml"), "modle_id: typo\n").unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = parse_config(Path::new("config.yaml"), "\n").unwrap();
        assert_eq!(file, FileConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let settings = Settings {
            limit_clean: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_model_options_follow_settings() {
        let settings = Settings {
            inference_endpoint: "http://localhost:9/models".to_string(),
            max_new_tokens: 64,
            max_retries: 0,
            ..Settings::default()
        };
        let options = settings.model_options();
        assert_eq!(options.endpoint, "http://localhost:9/models");
        assert_eq!(options.max_new_tokens, 64);
        assert_eq!(options.retry.max_retries, 0);
        assert_eq!(options.credential_env, "HF_TOKEN");
    }

    #[tokio::test]
    async fn test_load_config_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_attempts: 3\nmax_retries: 1\n").unwrap();

        let file = load_config(&path).await.unwrap();
        assert_eq!(file.max_attempts, Some(3));
        assert_eq!(file.max_retries, Some(1));
    }

    #[tokio::test]
    async fn test_load_missing_config() {
        let err = load_config(Path::new("/nonexistent/config.yaml")).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
