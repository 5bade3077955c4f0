//! Schema-guided prompt rendering.
//!
//! Templates use Jinja syntax and are rendered with `minijinja` in strict
//! mode. Besides the article text, a prompt embeds two things derived from
//! the [`ExtractionTask`]:
//!
//! - the format instructions: a JSON Schema of the expected object
//! - the seed fragment: an opening fence plus the first field's key, e.g.
//!   ```` ```{"reasoning": ````, which the model is expected to continue
//!
//! # Template variables
//!
//! | Variable | Required | Content |
//! |----------|----------|---------|
//! | `content_text` | yes | cleaned source text |
//! | `content_type` | yes | label such as `text` |
//! | `format_instructions` | yes | schema description |
//! | `helper_output_parser` | no | seed fragment (appended when absent) |
//! | `language` | no | language of the summary |
//! | `query` | no | task query; guard with `{% if query is defined %}` |
//! | `system_ack` | no | system acknowledgment string |

use crate::error::{AppError, Result};
use crate::models::ExtractionTask;
use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, instrument};

/// Template shipped with the binary.
const BUILTIN_TASK_TEMPLATE: &str = include_str!("../templates/task.jinja2");

/// Placeholders every template must contain.
pub const REQUIRED_PLACEHOLDERS: [&str; 3] = ["content_text", "content_type", "format_instructions"];

/// Variable holding the seed fragment.
pub const SEED_PLACEHOLDER: &str = "helper_output_parser";

/// `{{ name` openings left in rendered text.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder regex"));

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// A prompt template and the name it was loaded under.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    source: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// The summary task template compiled into the binary.
    pub fn builtin() -> Self {
        Self::new("task", BUILTIN_TASK_TEMPLATE)
    }

    /// Read a template from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Config {
                path: path.to_path_buf(),
                message: format!("cannot read template: {e}"),
            })?;
        Ok(Self::new(path.display().to_string(), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variables the template reads from its context.
    ///
    /// Names are taken from the parsed template, so text inside
    /// `{% raw %}` blocks or `{# #}` comments and loop-local variables do
    /// not count.
    ///
    /// # Returns
    ///
    /// The set of top-level variable names, or [`AppError::Render`] when the
    /// template does not parse.
    pub fn placeholders(&self) -> Result<BTreeSet<String>> {
        let env = environment();
        let template = env.template_from_str(&self.source)?;
        Ok(template.undeclared_variables(false).into_iter().collect())
    }

    /// Fail unless every required placeholder is present.
    pub fn check_required(&self) -> Result<()> {
        let names = self.placeholders()?;
        for placeholder in REQUIRED_PLACEHOLDERS {
            if !names.contains(placeholder) {
                return Err(AppError::MissingPlaceholder { placeholder });
            }
        }
        Ok(())
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub content_text: &'a str,
    pub content_type: &'a str,
    pub language: &'a str,
    pub query: Option<&'a str>,
    pub system_ack: Option<&'a str>,
}

impl<'a> PromptInputs<'a> {
    pub fn new(content_text: &'a str, content_type: &'a str) -> Self {
        Self {
            content_text,
            content_type,
            language: "English",
            query: None,
            system_ack: None,
        }
    }
}

/// A fully substituted prompt and the seed it ends on.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    text: String,
    seed: String,
}

impl RenderedPrompt {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Same prompt, prefixed with why the previous answer was rejected.
    pub fn with_feedback(&self, reason: &str) -> Self {
        Self {
            text: format!(
                "Your previous answer was rejected: {reason}. Follow the output schema exactly.\n\n{}",
                self.text
            ),
            seed: self.seed.clone(),
        }
    }
}

impl fmt::Debug for RenderedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedPrompt")
            .field("bytes", &self.text.len())
            .field("seed", &self.seed)
            .finish()
    }
}

/// Opening fence plus the first field's key.
pub fn seed_fragment(task: &ExtractionTask) -> String {
    format!("```{{\"{}\": ", task.seed_field().name)
}

/// Describe the expected JSON object so a model can produce it.
pub fn format_instructions(task: &ExtractionTask) -> String {
    let schema = task.json_schema().to_string();

    let mut out = String::from(
        "The output must be a JSON object that conforms to the JSON schema below.\n\n",
    );
    out.push_str(
        "For example, given the schema {\"properties\": {\"tags\": {\"title\": \"Tags\", \"description\": \"a list of strings\", \"type\": \"array\", \"items\": {\"type\": \"string\"}}}, \"required\": [\"tags\"]}\n",
    );
    out.push_str(
        "the object {\"tags\": [\"rust\", \"cli\"]} is a valid instance, while {\"properties\": {\"tags\": [\"rust\", \"cli\"]}} is not.\n\n",
    );
    out.push_str("Output schema:\n```\n");
    out.push_str(&schema);
    out.push_str("\n```");
    out
}

/// Render `template` for `task` over the given inputs.
///
/// Fails fast when a required placeholder is missing or when the template
/// outputs a variable that has no value. Optional variables (`query`,
/// `system_ack`) may be guarded with `is defined`. The rendered text is
/// checked afterwards: it must embed the source text and carry no leftover
/// placeholder for a known variable.
///
/// # Arguments
///
/// * `template` - The prompt template to render
/// * `task` - Fields the model must fill; drives the schema and the seed
/// * `inputs` - Source text, labels and optional extension values
///
/// # Returns
///
/// A [`RenderedPrompt`] whose text ends on the seed fragment.
#[instrument(level = "debug", skip_all, fields(template = %template.name(), task = %task.name()))]
pub fn build_prompt(
    template: &PromptTemplate,
    task: &ExtractionTask,
    inputs: &PromptInputs<'_>,
) -> Result<RenderedPrompt> {
    let env = environment();
    let compiled = env.template_from_str(template.source())?;
    let placeholders: BTreeSet<String> = compiled.undeclared_variables(false).into_iter().collect();
    for placeholder in REQUIRED_PLACEHOLDERS {
        if !placeholders.contains(placeholder) {
            return Err(AppError::MissingPlaceholder { placeholder });
        }
    }

    let seed = seed_fragment(task);
    let mut vars: BTreeMap<&str, String> = BTreeMap::new();
    vars.insert("content_text", inputs.content_text.to_string());
    vars.insert("content_type", inputs.content_type.to_string());
    vars.insert("format_instructions", format_instructions(task));
    vars.insert(SEED_PLACEHOLDER, seed.clone());
    vars.insert("language", inputs.language.to_string());
    if let Some(query) = inputs.query {
        vars.insert("query", query.to_string());
    }
    if let Some(ack) = inputs.system_ack {
        vars.insert("system_ack", ack.to_string());
    }

    let unresolved: Vec<String> = placeholders
        .iter()
        .filter(|name| !vars.contains_key(name.as_str()))
        .cloned()
        .collect();

    let mut text = compiled.render(&vars).map_err(|e| match e.kind() {
        minijinja::ErrorKind::UndefinedError if !unresolved.is_empty() => {
            AppError::UnresolvedPlaceholder {
                names: unresolved.clone(),
            }
        }
        _ => AppError::Render(e),
    })?;

    if !placeholders.contains(SEED_PLACEHOLDER) {
        text.push('\n');
        text.push_str(&seed);
    }

    check_rendered(&text, inputs.content_text, &vars)?;
    debug!(bytes = text.len(), "Rendered prompt");
    Ok(RenderedPrompt { text, seed })
}

/// Verify the rendered prompt embeds the source and left no known
/// placeholder behind. Occurrences inside the source text are ignored.
fn check_rendered(text: &str, content_text: &str, vars: &BTreeMap<&str, String>) -> Result<()> {
    if !content_text.is_empty() && !text.contains(content_text) {
        return Err(AppError::MissingPlaceholder { placeholder: "content_text" });
    }

    let residue = if content_text.is_empty() {
        text.to_string()
    } else {
        text.replace(content_text, "")
    };
    let leftover: BTreeSet<String> = PLACEHOLDER
        .captures_iter(&residue)
        .map(|caps| caps[1].to_string())
        .filter(|name| {
            vars.contains_key(name.as_str()) || matches!(name.as_str(), "query" | "system_ack")
        })
        .collect();
    if leftover.is_empty() {
        Ok(())
    } else {
        Err(AppError::UnresolvedPlaceholder {
            names: leftover.into_iter().collect(),
        })
    }
}
