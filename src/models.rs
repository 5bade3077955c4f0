//! Structured-output descriptions and the result types the model must fill.
//!
//! An [`ExtractionTask`] is an explicit, ordered list of fields that both the
//! prompt builder (to describe the expected JSON) and the extractor (to
//! validate it) consume. Result types implement [`StructuredOutput`] to hand
//! out their task description, so nothing relies on runtime reflection.

use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// JSON type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
}

impl FieldType {
    /// JSON Schema fragment describing this type.
    pub fn schema(&self) -> Value {
        match self {
            FieldType::String => json!({ "type": "string" }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
        }
    }

    /// Whether `value` has this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
        }
    }
}

/// One named field of an [`ExtractionTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Steers the model; copied verbatim into the schema description.
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: description.into(),
        }
    }

    /// "text_summary" -> "Text Summary"
    fn title(&self) -> String {
        self.name
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Ordered description of the object a model must produce.
///
/// Always holds at least one field; the first one seeds the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    name: String,
    fields: Vec<FieldSpec>,
}

impl ExtractionTask {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self> {
        let name = name.into();
        if fields.is_empty() {
            return Err(AppError::EmptyTask(name));
        }
        Ok(Self { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// The field whose key opens the seed fragment.
    pub fn seed_field(&self) -> &FieldSpec {
        &self.fields[0]
    }

    /// JSON Schema object with properties in declaration order.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields() {
            let mut property = Map::new();
            property.insert("title".to_string(), Value::String(field.title()));
            property.insert("description".to_string(), Value::String(field.description.clone()));
            if let Value::Object(type_schema) = field.field_type.schema() {
                property.extend(type_schema);
            }
            properties.insert(field.name.clone(), Value::Object(property));
        }
        let required: Vec<Value> = self
            .fields
            .iter()
            .map(|f| Value::String(f.name.clone()))
            .collect();

        json!({ "properties": properties, "required": required })
    }

    /// Check that every declared field is present with the declared type.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let object = value.as_object().ok_or_else(|| AppError::SchemaValidation {
            task: self.name.clone(),
            reason: format!("expected a JSON object, got {}", json_kind(value)),
        })?;

        for field in &self.fields {
            match object.get(&field.name) {
                None => {
                    return Err(AppError::SchemaValidation {
                        task: self.name.clone(),
                        reason: format!("missing field '{}'", field.name),
                    });
                }
                Some(v) if !field.field_type.matches(v) => {
                    return Err(AppError::SchemaValidation {
                        task: self.name.clone(),
                        reason: format!(
                            "field '{}' should be {}, got {}",
                            field.name,
                            field.field_type.name(),
                            json_kind(v)
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A type the model can be asked to produce.
pub trait StructuredOutput: DeserializeOwned {
    /// The task description matching this type's fields.
    fn task() -> Result<ExtractionTask>;
}

/// Tweet-style summary of an article.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SummaryText {
    /// What matters in the text and what a good summary needs.
    pub reasoning: String,
    /// The summary itself, a few sentences long.
    pub text_summary: String,
}

impl StructuredOutput for SummaryText {
    fn task() -> Result<ExtractionTask> {
        ExtractionTask::new(
            "SummaryText",
            vec![
                FieldSpec::new(
                    "reasoning",
                    FieldType::String,
                    "think about what information is useful and important, and what information is required for a good summary of the text",
                ),
                FieldSpec::new(
                    "text_summary",
                    FieldType::String,
                    "text summary of the extracted information, in a few sentences, more that 255 characters",
                ),
            ],
        )
    }
}
