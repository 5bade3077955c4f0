//! The two commands: print an article's cleaned text, or summarize it.
//!
//! `create` runs the whole pipeline strictly in order: fetch, normalize,
//! render the prompt, resolve the model, extract. Anything that can be
//! checked without the network (URL, settings, credential, template) is
//! checked first.

use crate::cli::{CreateArgs, GetArgs};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::extract::{RepairPolicy, extract_structured};
use crate::fetch::{fetch_article, validate_url};
use crate::http::build_client;
use crate::models::{StructuredOutput, SummaryText};
use crate::prompt::{PromptInputs, PromptTemplate, build_prompt};
use crate::provider::ModelProvider;
use crate::utils::truncate_for_log;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Label used for the `content_type` placeholder.
const CONTENT_TYPE: &str = "text";

fn fetch_client(settings: &Settings, url: &Url) -> Result<Client> {
    build_client(settings.timeout, &settings.user_agent).map_err(|source| AppError::FetchTransport {
        url: url.to_string(),
        source,
    })
}

/// Fetch an article and return its cleaned text.
#[instrument(level = "info", skip_all, fields(url = %args.url))]
pub async fn get_content_url(args: &GetArgs, settings: &Settings) -> Result<String> {
    let url = validate_url(&args.url)?;
    settings.validate()?;

    let client = fetch_client(settings, &url)?;
    fetch_article(&client, &url, &settings.retry_policy(), settings.limit_clean).await
}

fn warn_ignored_flags(args: &CreateArgs) {
    if let Some(quantization) = args.quantization {
        warn!(?quantization, "Quantization only applies to local models; ignoring it for the remote backend");
    }
    if args.local {
        warn!("Local loading is not supported by the remote backend; ignoring --local");
    }
}

async fn load_template(settings: &Settings) -> Result<PromptTemplate> {
    let template = match &settings.template {
        Some(path) => PromptTemplate::load(path).await?,
        None => PromptTemplate::builtin(),
    };
    template.check_required()?;
    info!(template = %template.name(), "Loaded template");
    Ok(template)
}

/// Generate a tweet-style summary of the article at `args.url`.
#[instrument(level = "info", skip_all, fields(url = %args.url, model = %settings.model_id))]
pub async fn create_from_article(
    args: &CreateArgs,
    settings: &Settings,
    provider: &ModelProvider,
) -> Result<SummaryText> {
    let url = validate_url(&args.url)?;
    settings.validate()?;
    warn_ignored_flags(args);
    provider.credential()?;
    let template = load_template(settings).await?;
    let task = SummaryText::task()?;

    let client = fetch_client(settings, &url)?;
    let text = fetch_article(&client, &url, &settings.retry_policy(), settings.limit_clean).await?;

    let mut inputs = PromptInputs::new(&text, CONTENT_TYPE);
    inputs.language = &settings.language;
    inputs.query = args.query.as_deref();
    inputs.system_ack = settings.system_ack.as_deref();
    let prompt = build_prompt(&template, &task, &inputs)?;

    let model = provider.resolve(&settings.model_id)?;
    let policy = RepairPolicy::new(settings.max_attempts);
    let summary: SummaryText = extract_structured(&prompt, model.as_ref(), &task, &policy).await?;

    debug!(
        reasoning = %truncate_for_log(&summary.reasoning, 25),
        text_summary = %truncate_for_log(&summary.text_summary, 25),
        "Output of SummaryText task"
    );
    Ok(summary)
}
