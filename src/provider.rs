//! Model provider adapter for the Hugging Face inference API.
//!
//! - [`TextCompletion`]: the one call the pipeline needs from a model
//! - [`HuggingFaceEndpoint`]: a resolved, callable handle for one model
//! - [`ModelProvider`]: memoized resolution of model identifiers to handles
//!
//! Provider errors (authentication, rate limits, timeouts, quota) surface
//! unchanged. Transient statuses are retried by the transport layer only.

use crate::error::{AppError, Result};
use crate::http::{RetryPolicy, build_client, send_with_backoff};
use crate::utils::truncate_for_log;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default serverless inference endpoint; the model id is appended.
pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co/models";

/// Environment variable holding the bearer token.
pub const DEFAULT_CREDENTIAL_ENV: &str = "HF_TOKEN";

/// Trait for text-completion backends.
///
/// Implementors send a prompt to a model and return the raw generated text,
/// without interpreting it.
pub trait TextCompletion {
    /// Identifier of the model behind this handle.
    fn identifier(&self) -> &str;

    /// Generate a continuation of `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Settings shared by every handle a [`ModelProvider`] resolves.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Base URL; requests go to `{endpoint}/{model_id}`.
    pub endpoint: String,
    /// Maximum number of tokens to generate.
    pub max_new_tokens: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Transport retry policy for 429/5xx answers.
    pub retry: RetryPolicy,
    /// Where to look for the token when none is passed explicitly.
    pub credential_env: String,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_new_tokens: 512,
            timeout: Duration::from_secs(60),
            user_agent: concat!("article_tweet/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
        }
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batch(Vec<Generated>),
    Single(Generated),
    Error { error: String },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Callable handle bound to one model identifier and credential.
pub struct HuggingFaceEndpoint {
    model_id: String,
    url: String,
    token: String,
    max_new_tokens: u32,
    client: Client,
    retry: RetryPolicy,
}

impl fmt::Debug for HuggingFaceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceEndpoint")
            .field("model_id", &self.model_id)
            .field("url", &self.url)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("retry", &self.retry)
            .finish()
    }
}

impl HuggingFaceEndpoint {
    pub fn new(model_id: &str, token: &str, options: &ModelOptions) -> Result<Self> {
        let client = build_client(options.timeout, &options.user_agent).map_err(|source| {
            AppError::ProviderTransport {
                model: model_id.to_string(),
                source,
            }
        })?;
        debug!(model_id, endpoint = %options.endpoint, "Loading model from Hugging Face inference API");

        Ok(Self {
            model_id: model_id.to_string(),
            url: format!("{}/{}", options.endpoint.trim_end_matches('/'), model_id),
            token: token.to_string(),
            max_new_tokens: options.max_new_tokens,
            client,
            retry: options.retry.clone(),
        })
    }

    fn unexpected(&self, message: String) -> AppError {
        AppError::ProviderResponse {
            model: self.model_id.clone(),
            message,
        }
    }
}

impl TextCompletion for HuggingFaceEndpoint {
    fn identifier(&self) -> &str {
        &self.model_id
    }

    #[instrument(level = "info", skip_all, fields(model = %self.model_id))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        debug!(prompt_bytes = prompt.len(), "Inference started");

        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters {
                max_new_tokens: self.max_new_tokens,
                return_full_text: false,
            },
            options: InferenceOptions { wait_for_model: true },
        };

        let response = send_with_backoff(&self.retry, || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.token)
                .json(&request)
        })
        .await
        .map_err(|source| AppError::ProviderTransport {
            model: self.model_id.clone(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| AppError::ProviderTransport {
            model: self.model_id.clone(),
            source,
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "Inference request rejected");
            return Err(AppError::ProviderStatus {
                model: self.model_id.clone(),
                status: status.as_u16(),
                message,
            });
        }

        let text = match serde_json::from_str::<InferenceResponse>(&body) {
            Ok(InferenceResponse::Batch(items)) => items
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .ok_or_else(|| self.unexpected("empty generation list".to_string()))?,
            Ok(InferenceResponse::Single(g)) => g.generated_text,
            Ok(InferenceResponse::Error { error }) => return Err(self.unexpected(error)),
            Err(e) => {
                return Err(self.unexpected(format!("{e}: {}", truncate_for_log(&body, 200))));
            }
        };

        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            completion_bytes = text.len(),
            "Inference finished"
        );
        Ok(text)
    }
}

/// Resolves model identifiers to handles, remembering the last one.
///
/// The cache holds a single entry: resolving the same identifier again
/// returns the same `Arc`, resolving a different one replaces it. The slot is
/// guarded by a mutex so concurrent callers never race on it.
pub struct ModelProvider {
    options: ModelOptions,
    credential: Option<String>,
    slot: Mutex<Option<(String, Arc<HuggingFaceEndpoint>)>>,
    resolutions: AtomicUsize,
}

impl fmt::Debug for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProvider")
            .field("options", &self.options)
            .field("explicit_credential", &self.credential.is_some())
            .field("resolutions", &self.resolutions())
            .finish()
    }
}

impl ModelProvider {
    pub fn new(options: ModelOptions, credential: Option<String>) -> Self {
        Self {
            options,
            credential,
            slot: Mutex::new(None),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Explicit token if given, otherwise the configured environment variable.
    pub fn credential(&self) -> Result<String> {
        self.credential
            .clone()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.options.credential_env)
                    .ok()
                    .filter(|token| !token.trim().is_empty())
            })
            .ok_or_else(|| AppError::MissingCredential {
                env_var: self.options.credential_env.clone(),
            })
    }

    /// Return the handle for `identifier`, building it on a cache miss.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Hub model id, e.g. `mistralai/Mistral-7B-Instruct-v0.3`
    ///
    /// # Returns
    ///
    /// A shared handle. The same `Arc` comes back until another identifier
    /// evicts it.
    ///
    /// # Errors
    ///
    /// [`AppError::MissingCredential`] when no token is available.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<HuggingFaceEndpoint>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((cached_id, handle)) = slot.as_ref() {
            if cached_id == identifier {
                debug!(model = identifier, "Model handle cache hit");
                return Ok(Arc::clone(handle));
            }
        }

        let token = self.credential()?;
        let handle = Arc::new(HuggingFaceEndpoint::new(identifier, &token, &self.options)?);
        if let Some((evicted, _)) = slot.replace((identifier.to_string(), Arc::clone(&handle))) {
            debug!(evicted = %evicted, model = identifier, "Evicting cached model handle");
        }
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        info!(model = identifier, "Model resolved");
        Ok(handle)
    }

    /// Number of cache misses so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}
