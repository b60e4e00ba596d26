//! Prompt library (C2): versioned, parameterized templates that render a
//! finalized prompt string plus a response-schema descriptor.
//!
//! Templates are plain Rust functions over a small input map, matching the
//! inline `.replace()`-based prompt construction the model client uses
//! rather than a general templating engine.

use serde_json::Value;

use crate::error::PromptError;
use crate::model::TaskKind;

/// Soft cap on characters sent to the model; longer fields are truncated
/// from the tail deterministically.
const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 24_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVersion(pub String);

#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub text: String,
    pub template_version: TemplateVersion,
    pub response_schema: Value,
    pub truncated: bool,
}

/// Render the prompt for `task` from `inputs` (document text under `"text"`,
/// plus task-specific parameters), truncating to `context_budget_chars`.
pub fn render(
    task: TaskKind,
    inputs: &serde_json::Map<String, Value>,
    version: &str,
    context_budget_chars: usize,
) -> Result<RenderedPrompt, PromptError> {
    let text = inputs
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PromptError::MissingInput("text".to_string()))?;

    let (truncated_text, truncated) = truncate_tail(text, context_budget_chars);

    let (body, schema) = match task {
        TaskKind::ExtractText => {
            return Err(PromptError::MissingInput(
                "extract_text has no model prompt".to_string(),
            ))
        }
        TaskKind::ExtractTender => (extract_tender_prompt(&truncated_text), extract_tender_schema()),
        TaskKind::GenerateQuotation => {
            let tender_summary = inputs
                .get("tender_summary")
                .and_then(|v| v.as_str())
                .ok_or_else(|| PromptError::MissingInput("tender_summary".to_string()))?;
            (
                generate_quotation_prompt(&truncated_text, tender_summary),
                generate_quotation_schema(),
            )
        }
        TaskKind::AnalyzeRisk => (analyze_risk_prompt(&truncated_text), analyze_risk_schema()),
        TaskKind::Batch => {
            return Err(PromptError::MissingInput(
                "batch has no direct model prompt".to_string(),
            ))
        }
    };

    Ok(RenderedPrompt {
        text: body,
        template_version: TemplateVersion(version.to_string()),
        response_schema: schema,
        truncated,
    })
}

fn truncate_tail(text: &str, budget: usize) -> (String, bool) {
    if text.chars().count() <= budget {
        return (text.to_string(), false);
    }
    let truncated: String = text.chars().take(budget).collect();
    (truncated, true)
}

fn extract_tender_prompt(text: &str) -> String {
    format!(
        "You are extracting structured tender metadata from a procurement document.\n\
         Respond with a single JSON object matching the required schema: \
         {{\"title\": string, \"buyer\": string, \"deadline\": string, \"estimated_value\": number, \"lots\": array of string}}.\n\n\
         Document:\n{text}"
    )
}

fn extract_tender_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["title", "buyer", "deadline", "estimated_value", "lots"],
        "properties": {
            "title": {"type": "string"},
            "buyer": {"type": "string"},
            "deadline": {"type": "string"},
            "estimated_value": {"type": "number"},
            "lots": {"type": "array", "items": {"type": "string"}}
        }
    })
}

fn generate_quotation_prompt(text: &str, tender_summary: &str) -> String {
    format!(
        "You are drafting a commercial quotation in response to a tender.\n\
         Tender summary: {tender_summary}\n\
         Respond with a single JSON object: {{\"line_items\": array of {{\"description\": string, \"unit_price\": number, \"quantity\": number}}, \"total\": number, \"notes\": string}}.\n\n\
         Tender document excerpt:\n{text}"
    )
}

fn generate_quotation_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["line_items", "total", "notes"],
        "properties": {
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["description", "unit_price", "quantity"],
                    "properties": {
                        "description": {"type": "string"},
                        "unit_price": {"type": "number"},
                        "quantity": {"type": "number"}
                    }
                }
            },
            "total": {"type": "number"},
            "notes": {"type": "string"}
        }
    })
}

fn analyze_risk_prompt(text: &str) -> String {
    format!(
        "You are assessing procurement risk for a tender document.\n\
         Respond with a single JSON object: {{\"risk_score\": number between 0 and 1, \"complexity\": one of \"low\"|\"medium\"|\"high\", \"factors\": array of string}}.\n\n\
         Document:\n{text}"
    )
}

fn analyze_risk_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["risk_score", "complexity", "factors"],
        "properties": {
            "risk_score": {"type": "number", "minimum": 0, "maximum": 1},
            "complexity": {"type": "string", "enum": ["low", "medium", "high"]},
            "factors": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Configurable thresholds for mapping a numeric risk score to a complexity
/// bucket (§9 open question — kept as constants, not hardcoded magic numbers
/// scattered through call sites).
#[derive(Debug, Clone, Copy)]
pub struct RiskThresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.5,
        }
    }
}

impl RiskThresholds {
    pub fn bucket(&self, score: f32) -> &'static str {
        if score >= self.high {
            "high"
        } else if score >= self.medium {
            "medium"
        } else {
            "low"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(text: &str) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("text".to_string(), Value::String(text.to_string()));
        map
    }

    #[test]
    fn missing_required_input_is_an_error() {
        let empty = serde_json::Map::new();
        let err = render(TaskKind::AnalyzeRisk, &empty, "1.0.0", 1000).unwrap_err();
        assert!(matches!(err, PromptError::MissingInput(_)));
    }

    #[test]
    fn truncates_deterministically_from_the_tail() {
        let long_text = "a".repeat(100);
        let rendered = render(TaskKind::AnalyzeRisk, &inputs(&long_text), "1.0.0", 10).unwrap();
        assert!(rendered.truncated);
        assert!(rendered.text.contains(&"a".repeat(10)));
        assert!(!rendered.text.contains(&"a".repeat(11)));
    }

    #[test]
    fn risk_thresholds_bucket_correctly() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.bucket(0.9), "high");
        assert_eq!(thresholds.bucket(0.6), "medium");
        assert_eq!(thresholds.bucket(0.1), "low");
    }
}
