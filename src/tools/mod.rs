//! Tool declarations for outgoing requests and the permission seam.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::tool::ToolKind;

/// Answers whether a tool may be declared for a model.
///
/// Consulted while building the request body, never inside the stream loop.
pub trait ToolPermissions: Send + Sync {
    fn is_tool_supported(&self, tool: ToolKind, model: &str, streaming: bool) -> bool;
}

/// Permits every tool for every model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllTools;

impl ToolPermissions for AllowAllTools {
    fn is_tool_supported(&self, _tool: ToolKind, _model: &str, _streaming: bool) -> bool {
        true
    }
}

/// Server-side approval requirement declared for an MCP server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpApprovalMode {
    #[default]
    Always,
    Never,
}

/// A remote MCP server exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServer {
    pub server_label: String,
    pub server_url: String,
    #[serde(default)]
    pub require_approval: McpApprovalMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

/// Display the computer-use tool drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputerDisplay {
    pub display_width: u32,
    pub display_height: u32,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "browser".to_string()
}

/// Tool toggles from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    pub web_search: bool,
    pub code_interpreter: bool,
    pub image_generation: bool,
    /// Streamed preview frames per generated image (0-3).
    pub partial_images: Option<u32>,
    pub file_search_vector_store_ids: Vec<String>,
    pub computer_use: Option<ComputerDisplay>,
    pub mcp_servers: Vec<McpServer>,
}

impl ToolSettings {
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = Vec::new();
        if self.web_search {
            specs.push(ToolSpec::WebSearch);
        }
        if self.code_interpreter {
            specs.push(ToolSpec::CodeInterpreter);
        }
        if self.image_generation {
            specs.push(ToolSpec::ImageGeneration {
                partial_images: self.partial_images,
            });
        }
        if !self.file_search_vector_store_ids.is_empty() {
            specs.push(ToolSpec::FileSearch {
                vector_store_ids: self.file_search_vector_store_ids.clone(),
            });
        }
        if let Some(display) = &self.computer_use {
            specs.push(ToolSpec::ComputerUse(display.clone()));
        }
        specs.extend(self.mcp_servers.iter().cloned().map(ToolSpec::Mcp));
        specs
    }
}

/// One tool declaration in a request body.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSpec {
    Function {
        name: String,
        description: Option<String>,
        parameters: Value,
    },
    WebSearch,
    FileSearch {
        vector_store_ids: Vec<String>,
    },
    CodeInterpreter,
    ImageGeneration {
        partial_images: Option<u32>,
    },
    ComputerUse(ComputerDisplay),
    Mcp(McpServer),
}

impl ToolSpec {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Function { .. } => ToolKind::Function,
            Self::WebSearch => ToolKind::WebSearch,
            Self::FileSearch { .. } => ToolKind::FileSearch,
            Self::CodeInterpreter => ToolKind::CodeInterpreter,
            Self::ImageGeneration { .. } => ToolKind::ImageGeneration,
            Self::ComputerUse(_) => ToolKind::Computer,
            Self::Mcp(_) => ToolKind::Mcp,
        }
    }

    /// The request-body form of this declaration.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Function {
                name,
                description,
                parameters,
            } => {
                let mut tool = json!({
                    "type": "function",
                    "name": name,
                    "parameters": normalize_parameters(parameters),
                });
                if let (Some(description), Some(map)) = (description, tool.as_object_mut()) {
                    map.insert("description".into(), Value::String(description.clone()));
                }
                tool
            }
            Self::WebSearch => json!({"type": "web_search_preview"}),
            Self::FileSearch { vector_store_ids } => json!({
                "type": "file_search",
                "vector_store_ids": vector_store_ids,
            }),
            Self::CodeInterpreter => json!({
                "type": "code_interpreter",
                "container": {"type": "auto"},
            }),
            Self::ImageGeneration { partial_images } => {
                let mut tool = json!({"type": "image_generation"});
                if let (Some(count), Some(map)) = (partial_images, tool.as_object_mut()) {
                    map.insert("partial_images".into(), json!((*count).min(3)));
                }
                tool
            }
            Self::ComputerUse(display) => json!({
                "type": "computer_use_preview",
                "display_width": display.display_width,
                "display_height": display.display_height,
                "environment": display.environment,
            }),
            Self::Mcp(server) => {
                let mut tool = json!({
                    "type": "mcp",
                    "server_label": server.server_label,
                    "server_url": server.server_url,
                    "require_approval": server.require_approval,
                });
                if let (Some(allowed), Some(map)) = (&server.allowed_tools, tool.as_object_mut()) {
                    map.insert("allowed_tools".into(), json!(allowed));
                }
                tool
            }
        }
    }
}

/// Object schemas must carry `required`, even if empty.
fn normalize_parameters(schema: &Value) -> Value {
    match schema.as_object() {
        Some(obj) => {
            let mut next = obj.clone();
            if matches!(next.get("type"), Some(Value::String(t)) if t == "object") {
                next.entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
            }
            Value::Object(next)
        }
        None => json!({"type": "object", "properties": {}, "required": []}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn settings_expand_to_specs_in_stable_order() {
        let settings = ToolSettings {
            web_search: true,
            image_generation: true,
            partial_images: Some(5),
            mcp_servers: vec![McpServer {
                server_label: "docs".into(),
                server_url: "https://mcp.example.com".into(),
                require_approval: McpApprovalMode::Always,
                allowed_tools: None,
            }],
            ..Default::default()
        };
        let kinds: Vec<ToolKind> = settings.specs().iter().map(ToolSpec::kind).collect();
        assert_eq!(
            kinds,
            vec![ToolKind::WebSearch, ToolKind::ImageGeneration, ToolKind::Mcp]
        );
        assert_eq!(settings.specs()[1].to_wire()["partial_images"], 3);
        assert_eq!(settings.specs()[2].to_wire()["require_approval"], "always");
    }

    #[test]
    fn function_schema_gets_required_list() {
        let spec = ToolSpec::Function {
            name: "lookup".into(),
            description: Some("Find a city".into()),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        };
        let wire = spec.to_wire();
        assert_eq!(wire["parameters"]["required"], json!([]));
        assert_eq!(wire["description"], "Find a city");
    }
}
