//! Turning a free-text completion into a validated structured value.
//!
//! The prompt ends on a seed fragment (```` ```{"reasoning": ````), so a
//! cooperative model simply continues the JSON object and closes the fence.
//! Repair re-attaches what the model was biased to continue:
//!
//! 1. completion starts with a fence: the model restated everything, use it as-is
//! 2. completion starts with `{`: the model restated the object, add the fence
//! 3. otherwise: prepend the whole seed
//!
//! The first closed fenced segment is then parsed as JSON and checked against
//! the task's declared fields.

use crate::error::{AppError, Result};
use crate::models::ExtractionTask;
use crate::prompt::RenderedPrompt;
use crate::provider::TextCompletion;
use crate::utils::{looks_truncated, truncate_for_log};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const FENCE: &str = "```";

/// How many model calls one extraction may spend.
///
/// The default of one call means no re-prompting: a bad answer fails the
/// request. With more attempts, each retry prepends the rejection reason to
/// the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_attempts: usize,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl RepairPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Rebuild the text the model was asked to continue.
///
/// # Examples
///
/// ```ignore
/// let seed = "```{\"reasoning\": ";
/// assert_eq!(repair_completion(seed, "\"x\"}```"), "```{\"reasoning\": \"x\"}```");
/// assert_eq!(repair_completion(seed, "{\"a\": 1}```"), "```{\"a\": 1}```");
/// ```
pub fn repair_completion(seed: &str, raw: &str) -> String {
    let trimmed = raw.trim_start();
    if trimmed.starts_with(FENCE) {
        trimmed.to_string()
    } else if trimmed.starts_with('{') {
        format!("{FENCE}{trimmed}")
    } else {
        format!("{seed}{raw}")
    }
}

/// Contents of the first block opened and closed by a fence.
///
/// A language tag on the opening line (```` ```json ````) is dropped.
pub fn first_fenced_segment(text: &str) -> Option<&str> {
    let mut parts = text.split(FENCE);
    parts.next()?;
    let segment = parts.next()?;
    // the segment only counts once a closing fence follows it
    parts.next()?;

    let segment = match segment.split_once('\n') {
        Some((tag, rest))
            if !tag.trim().is_empty()
                && tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            rest
        }
        _ => segment,
    };
    Some(segment.trim())
}

/// Parse `segment` as JSON and check it against `task`.
pub fn parse_validated<T: DeserializeOwned>(segment: &str, task: &ExtractionTask) -> Result<T> {
    let value: Value = serde_json::from_str(segment).map_err(|source| {
        if looks_truncated(&source) {
            warn!(error = %source, "Fenced block ends early; the completion looks truncated");
        }
        AppError::UnparseableBlock { source }
    })?;

    task.validate(&value)?;

    serde_json::from_value(value).map_err(|e| AppError::SchemaValidation {
        task: task.name().to_string(),
        reason: e.to_string(),
    })
}

/// Repair one raw completion and parse it.
pub fn parse_completion<T: DeserializeOwned>(seed: &str, raw: &str, task: &ExtractionTask) -> Result<T> {
    let combined = repair_completion(seed, raw);
    let segment = first_fenced_segment(&combined).ok_or(AppError::NoFencedBlock)?;
    debug!(segment = %truncate_for_log(segment, 200), "Extracted fenced segment");
    parse_validated(segment, task)
}

/// Ask `model` for `prompt` and coerce the answer into `T`.
///
/// Provider failures are returned immediately. Extraction and schema
/// failures are retried only while `policy` has attempts left.
#[instrument(level = "info", skip_all, fields(model = %model.identifier(), task = %task.name()))]
pub async fn extract_structured<T, M>(
    prompt: &RenderedPrompt,
    model: &M,
    task: &ExtractionTask,
    policy: &RepairPolicy,
) -> Result<T>
where
    T: DeserializeOwned,
    M: TextCompletion,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut current = prompt.clone();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let raw = model.complete(current.text()).await?;
        debug!(attempt, completion = %truncate_for_log(&raw, 300), "Model completion received");

        match parse_completion(prompt.seed(), &raw, task) {
            Ok(value) => {
                info!(attempt, "Structured output validated");
                return Ok(value);
            }
            Err(e) if e.is_repairable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "Model output rejected; re-prompting");
                current = prompt.with_feedback(&e.to_string());
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    response_preview = %truncate_for_log(&raw, 300),
                    "Model returned non-conforming output"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StructuredOutput, SummaryText};
    use crate::prompt::{PromptInputs, PromptTemplate, build_prompt};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SEED: &str = "```{\"reasoning\": ";

    /// Replays canned completions and records the prompts it saw.
    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl TextCompletion for ScriptedModel {
        fn identifier(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    struct FailingModel {
        calls: AtomicUsize,
    }

    impl TextCompletion for FailingModel {
        fn identifier(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::ProviderStatus {
                model: "failing".to_string(),
                status: 504,
                message: "Gateway timeout".to_string(),
            })
        }
    }

    fn summary_prompt() -> RenderedPrompt {
        build_prompt(
            &PromptTemplate::builtin(),
            &SummaryText::task().unwrap(),
            &PromptInputs::new("Some article.", "text"),
        )
        .unwrap()
    }

    #[test]
    fn test_repair_prepends_seed_to_continuation() {
        let combined = repair_completion(SEED, "\"why\", \"text_summary\": \"blurb\"}```");
        assert_eq!(combined, "```{\"reasoning\": \"why\", \"text_summary\": \"blurb\"}```");
    }

    #[test]
    fn test_repair_restated_object_gets_fence_only() {
        let combined = repair_completion(SEED, " {\"text_summary\": \"a\", \"reasoning\": \"b\"}```");
        assert_eq!(combined, "```{\"text_summary\": \"a\", \"reasoning\": \"b\"}```");
    }

    #[test]
    fn test_repair_restated_fence_used_as_is() {
        let raw = "```json\n{\"reasoning\": \"b\", \"text_summary\": \"a\"}\n```";
        assert_eq!(repair_completion(SEED, raw), raw);
    }

    #[test]
    fn test_first_fenced_segment_requires_closing_fence() {
        assert_eq!(first_fenced_segment("```{\"a\": 1}```"), Some("{\"a\": 1}"));
        assert_eq!(first_fenced_segment("noise ```{\"a\": 1}``` more ```x```"), Some("{\"a\": 1}"));
        assert_eq!(first_fenced_segment("```{\"a\": 1}"), None);
        assert_eq!(first_fenced_segment("no fence at all"), None);
    }

    #[test]
    fn test_first_fenced_segment_drops_language_tag() {
        assert_eq!(first_fenced_segment("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(first_fenced_segment("```\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_restated_object_with_reordered_fields_parses() {
        let raw = "{\"text_summary\": \"short blurb\", \"reasoning\": \"why\"}```";
        let summary: SummaryText = parse_completion(SEED, raw, &SummaryText::task().unwrap()).unwrap();
        assert_eq!(summary.reasoning, "why");
        assert_eq!(summary.text_summary, "short blurb");
    }

    #[test]
    fn test_seed_continuation_parses() {
        let raw = "\"the launch matters\", \"text_summary\": \"Rust 2024 is out!\"}\n```\nHope this helps.";
        let summary: SummaryText = parse_completion(SEED, raw, &SummaryText::task().unwrap()).unwrap();
        assert_eq!(summary.reasoning, "the launch matters");
        assert_eq!(summary.text_summary, "Rust 2024 is out!");
    }

    #[test]
    fn test_completion_without_fence_is_extraction_error() {
        let raw = "\"why\", \"text_summary\": \"blurb\"}";
        let err = parse_completion::<SummaryText>(SEED, raw, &SummaryText::task().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::NoFencedBlock));
    }

    #[test]
    fn test_invalid_json_is_extraction_error() {
        let raw = "\"why\", \"text_summary\": }```";
        let err = parse_completion::<SummaryText>(SEED, raw, &SummaryText::task().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::UnparseableBlock { .. }));
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let raw = "```json\n{\"reasoning\": \"why\"}\n```";
        let err = parse_completion::<SummaryText>(SEED, raw, &SummaryText::task().unwrap()).unwrap_err();
        match err {
            AppError::SchemaValidation { reason, .. } => assert!(reason.contains("text_summary")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_structured_success() {
        let model = ScriptedModel::new(&["\"why\", \"text_summary\": \"blurb\"}```"]);
        let prompt = summary_prompt();
        let summary: SummaryText =
            extract_structured(&prompt, &model, &SummaryText::task().unwrap(), &RepairPolicy::default())
                .await
                .unwrap();
        assert_eq!(summary.text_summary, "blurb");
        assert_eq!(model.calls(), 1);
        assert_eq!(model.prompts.lock().unwrap()[0], prompt.text());
    }

    #[tokio::test]
    async fn test_default_policy_does_not_reprompt() {
        let model = ScriptedModel::new(&[
            "I cannot do that.",
            "\"why\", \"text_summary\": \"blurb\"}```",
        ]);
        let err = extract_structured::<SummaryText, _>(
            &summary_prompt(),
            &model,
            &SummaryText::task().unwrap(),
            &RepairPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NoFencedBlock));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_bounded_reprompt_feeds_back_error() {
        let model = ScriptedModel::new(&[
            "\"why\"}```",
            "\"why\", \"text_summary\": \"second try\"}```",
        ]);
        let prompt = summary_prompt();
        let summary: SummaryText =
            extract_structured(&prompt, &model, &SummaryText::task().unwrap(), &RepairPolicy::new(3))
                .await
                .unwrap();
        assert_eq!(summary.text_summary, "second try");

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("Your previous answer was rejected"));
        assert!(prompts[1].contains("missing field 'text_summary'"));
        assert!(prompts[1].ends_with(prompt.seed()));
    }

    #[tokio::test]
    async fn test_reprompt_gives_up_after_max_attempts() {
        let model = ScriptedModel::new(&["nope", "still nope"]);
        let err = extract_structured::<SummaryText, _>(
            &summary_prompt(),
            &model,
            &SummaryText::task().unwrap(),
            &RepairPolicy::new(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NoFencedBlock));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_reprompted() {
        let model = FailingModel { calls: AtomicUsize::new(0) };
        let err = extract_structured::<SummaryText, _>(
            &summary_prompt(),
            &model,
            &SummaryText::task().unwrap(),
            &RepairPolicy::new(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::ProviderStatus { status: 504, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
