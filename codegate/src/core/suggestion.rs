//! Typed view of a suggestion backend's JSON response.

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SUGGESTION_SCHEMA: &str = include_str!("../../../schemas/suggestion/v1.schema.json");

/// One suggestion. `mode` selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Suggestion {
    Patch {
        diff: String,
        #[serde(default)]
        why: String,
    },
    ToolRequest {
        #[serde(default)]
        requests: Vec<ToolRequest>,
        #[serde(default)]
        why: String,
    },
    FeatureSummary {
        #[serde(default)]
        summary: String,
        #[serde(default = "default_completion_status")]
        completion_status: String,
        #[serde(default)]
        why: String,
    },
}

fn default_completion_status() -> String {
    "complete".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolRequest {
    /// First of `keys` present in `args` as a string.
    pub fn arg(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.args.get(*key).and_then(Value::as_str))
    }

    pub fn tool_matches(&self, keywords: &[&str]) -> bool {
        let tool = self.tool.to_ascii_lowercase();
        keywords.iter().any(|keyword| tool.contains(keyword))
    }
}

/// Validate and decode a raw response.
///
/// Objects without a `mode` are treated as tool requests. Schema violations
/// come back as one joined message.
pub fn parse_suggestion(mut raw: Value) -> Result<Suggestion, String> {
    let Some(object) = raw.as_object_mut() else {
        return Err("suggestion is not a JSON object".to_string());
    };
    object
        .entry("mode")
        .or_insert_with(|| Value::String("tool_request".to_string()));

    let schema: Value = serde_json::from_str(SUGGESTION_SCHEMA)
        .map_err(|err| format!("parse suggestion schema: {err}"))?;
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("compile suggestion schema: {err}"))?;
    let messages: Vec<String> = validator.iter_errors(&raw).map(|err| err.to_string()).collect();
    if !messages.is_empty() {
        return Err(format!("schema validation failed: {}", messages.join("; ")));
    }

    serde_json::from_value(raw).map_err(|err| format!("decode suggestion: {err}"))
}
