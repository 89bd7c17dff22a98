//! Request bodies for opening and resuming a Responses stream.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::{Display, EnumString};

use crate::config::StreamConfig;
use crate::tools::{ToolPermissions, ToolSpec};

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// Per-request generation options.
///
/// ```
/// use openresponses::request::{ReasoningEffort, ResponseSettings};
///
/// let settings = ResponseSettings::builder()
///     .max_output_tokens(512)
///     .reasoning_effort(ReasoningEffort::Low)
///     .build();
/// assert_eq!(settings.max_output_tokens, Some(512));
/// ```
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize, PartialEq)]
pub struct ResponseSettings {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    #[builder(into)]
    pub instructions: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub parallel_tool_calls: Option<bool>,
    pub store: Option<bool>,
    #[builder(into)]
    pub previous_response_id: Option<String>,
}

/// Build the body for a fresh stream.
///
/// Tools come from the configuration plus `extra_tools`. Any tool the
/// permission source rejects for the configured model is left out.
pub fn build_request_body(
    config: &StreamConfig,
    input: Value,
    extra_tools: &[ToolSpec],
    settings: &ResponseSettings,
    permissions: &dyn ToolPermissions,
) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), Value::String(config.model.clone()));
    body.insert("input".into(), normalize_input(input));
    body.insert("stream".into(), Value::Bool(true));

    let tools: Vec<Value> = config
        .tools
        .specs()
        .iter()
        .chain(extra_tools)
        .filter(|spec| {
            let supported = permissions.is_tool_supported(spec.kind(), &config.model, true);
            if !supported {
                tracing::warn!(
                    tool = %spec.kind(),
                    model = %config.model,
                    "tool not supported for model; leaving it out"
                );
            }
            supported
        })
        .map(ToolSpec::to_wire)
        .collect();
    if !tools.is_empty() {
        body.insert("tools".into(), Value::Array(tools));
    }

    if let Some(max) = settings.max_output_tokens {
        body.insert("max_output_tokens".into(), json!(max));
    }
    if let Some(temperature) = settings.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(instructions) = &settings.instructions {
        body.insert("instructions".into(), json!(instructions));
    }
    if let Some(effort) = settings.reasoning_effort {
        body.insert("reasoning".into(), json!({ "effort": effort }));
    }
    if let Some(parallel) = settings.parallel_tool_calls {
        body.insert("parallel_tool_calls".into(), json!(parallel));
    }
    if let Some(store) = settings.store {
        body.insert("store".into(), json!(store));
    }
    if let Some(previous) = &settings.previous_response_id {
        body.insert("previous_response_id".into(), json!(previous));
    }
    Value::Object(body)
}

/// Body for resuming after an approval decision.
///
/// Keeps the original model, tools and options, replaces the input with the
/// decision items, and chains on `previous_response_id`.
pub fn continuation_body(original: &Value, previous_response_id: &str, input: Vec<Value>) -> Value {
    let mut body = original.as_object().cloned().unwrap_or_default();
    body.insert("input".into(), Value::Array(input));
    body.insert(
        "previous_response_id".into(),
        Value::String(previous_response_id.to_string()),
    );
    body.insert("stream".into(), Value::Bool(true));
    Value::Object(body)
}

/// A bare string becomes a single user message.
fn normalize_input(input: Value) -> Value {
    match input {
        Value::String(text) => json!([{
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        }]),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::AllowAllTools;
    use crate::types::tool::ToolKind;
    use pretty_assertions::assert_eq;

    struct NoImages;

    impl ToolPermissions for NoImages {
        fn is_tool_supported(&self, tool: ToolKind, _model: &str, _streaming: bool) -> bool {
            tool != ToolKind::ImageGeneration
        }
    }

    fn config() -> StreamConfig {
        let mut config = StreamConfig::default();
        config.model = "gpt-test".into();
        config.tools.web_search = true;
        config.tools.image_generation = true;
        config
    }

    #[test]
    fn string_input_becomes_user_message() {
        let body = build_request_body(
            &config(),
            json!("hello"),
            &[],
            &ResponseSettings::default(),
            &AllowAllTools,
        );
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["stream"], true);
        assert_eq!(body["input"][0]["role"], "user");
        assert_eq!(body["input"][0]["content"][0]["text"], "hello");
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn unsupported_tools_are_dropped() {
        let body = build_request_body(
            &config(),
            json!("draw"),
            &[],
            &ResponseSettings::default(),
            &NoImages,
        );
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "web_search_preview");
    }

    #[test]
    fn settings_land_in_body() {
        let settings = ResponseSettings::builder()
            .max_output_tokens(64)
            .instructions("be brief")
            .reasoning_effort(ReasoningEffort::High)
            .store(true)
            .build();
        let body = build_request_body(
            &StreamConfig::default(),
            json!([]),
            &[],
            &settings,
            &AllowAllTools,
        );
        assert_eq!(body["max_output_tokens"], 64);
        assert_eq!(body["instructions"], "be brief");
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["store"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn continuation_keeps_options_and_replaces_input() {
        let original = json!({
            "model": "gpt-test",
            "input": "first",
            "tools": [{"type": "mcp"}],
        });
        let body = continuation_body(
            &original,
            "resp_1",
            vec![json!({"type": "mcp_approval_response", "approve": true})],
        );
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["tools"], original["tools"]);
        assert_eq!(body["previous_response_id"], "resp_1");
        assert_eq!(body["input"][0]["type"], "mcp_approval_response");
    }
}
