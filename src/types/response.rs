//! Output items, content parts and the finalized response.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::StreamError;

use super::tool::{ToolInvocation, ToolKind};
use super::usage::Usage;

/// Kind of top-level output item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    Message,
    Reasoning,
    FunctionCall,
    CustomToolCall,
    CodeInterpreterCall,
    ImageGenerationCall,
    WebSearchCall,
    FileSearchCall,
    McpCall,
    McpListTools,
    McpApprovalRequest,
    ComputerCall,
    Other(String),
}

impl ItemType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Reasoning => "reasoning",
            Self::FunctionCall => "function_call",
            Self::CustomToolCall => "custom_tool_call",
            Self::CodeInterpreterCall => "code_interpreter_call",
            Self::ImageGenerationCall => "image_generation_call",
            Self::WebSearchCall => "web_search_call",
            Self::FileSearchCall => "file_search_call",
            Self::McpCall => "mcp_call",
            Self::McpListTools => "mcp_list_tools",
            Self::McpApprovalRequest => "mcp_approval_request",
            Self::ComputerCall => "computer_call",
            Self::Other(other) => other.as_str(),
        }
    }

    /// The tool kind tracked for this item, if it is a tool-bearing item.
    pub fn tool_kind(&self) -> Option<ToolKind> {
        match self {
            Self::FunctionCall | Self::CustomToolCall => Some(ToolKind::Function),
            Self::CodeInterpreterCall => Some(ToolKind::CodeInterpreter),
            Self::ImageGenerationCall => Some(ToolKind::ImageGeneration),
            Self::WebSearchCall => Some(ToolKind::WebSearch),
            Self::FileSearchCall => Some(ToolKind::FileSearch),
            Self::McpCall | Self::McpApprovalRequest => Some(ToolKind::Mcp),
            Self::ComputerCall => Some(ToolKind::Computer),
            Self::Message | Self::Reasoning | Self::McpListTools | Self::Other(_) => None,
        }
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        match value {
            "message" => Self::Message,
            "reasoning" => Self::Reasoning,
            "function_call" => Self::FunctionCall,
            "custom_tool_call" => Self::CustomToolCall,
            "code_interpreter_call" => Self::CodeInterpreterCall,
            "image_generation_call" => Self::ImageGenerationCall,
            "web_search_call" => Self::WebSearchCall,
            "file_search_call" => Self::FileSearchCall,
            "mcp_call" => Self::McpCall,
            "mcp_list_tools" => Self::McpListTools,
            "mcp_approval_request" => Self::McpApprovalRequest,
            "computer_call" => Self::ComputerCall,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ItemType> for String {
    fn from(value: ItemType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

impl ItemStatus {
    pub fn from_wire(status: Option<&str>) -> Self {
        match status {
            Some("failed") => Self::Failed,
            Some("incomplete") => Self::Incomplete,
            _ => Self::Completed,
        }
    }
}

/// Kind of content part.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PartType {
    Text,
    Refusal,
    Image,
    ToolArtifact,
}

impl PartType {
    pub fn from_wire(part_type: Option<&str>) -> Self {
        match part_type {
            None | Some("output_text" | "text" | "summary_text" | "reasoning_text") => Self::Text,
            Some("refusal") => Self::Refusal,
            Some("image" | "output_image" | "partial_image") => Self::Image,
            Some(_) => Self::ToolArtifact,
        }
    }
}

/// Accumulated payload of a content part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartPayload {
    Text {
        text: String,
    },
    Image {
        base64: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_index: Option<u32>,
    },
    Artifact {
        value: serde_json::Value,
    },
}

/// A sub-unit of an output item's payload, built from deltas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    pub index: u32,
    pub part_type: PartType,
    pub payload: PartPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<serde_json::Value>,
    pub done: bool,
}

impl ContentPart {
    pub fn text(index: u32, part_type: PartType, text: impl Into<String>) -> Self {
        Self {
            index,
            part_type,
            payload: PartPayload::Text { text: text.into() },
            annotations: Vec::new(),
            done: false,
        }
    }

    pub fn image(index: u32, base64: impl Into<String>, partial_index: Option<u32>) -> Self {
        Self {
            index,
            part_type: PartType::Image,
            payload: PartPayload::Image {
                base64: base64.into(),
                partial_index,
            },
            annotations: Vec::new(),
            done: false,
        }
    }

    pub fn artifact(index: u32, value: serde_json::Value) -> Self {
        Self {
            index,
            part_type: PartType::ToolArtifact,
            payload: PartPayload::Artifact { value },
            annotations: Vec::new(),
            done: false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            PartPayload::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Decode an image payload into raw bytes.
    pub fn image_bytes(&self) -> Result<Vec<u8>, StreamError> {
        match &self.payload {
            PartPayload::Image { base64: data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| StreamError::InvalidState(format!("invalid image payload: {e}"))),
            _ => Err(StreamError::InvalidState(format!(
                "content part {} is not an image",
                self.index
            ))),
        }
    }
}

/// One top-level unit of model output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_index: Option<u32>,
    pub item_type: ItemType,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub content: Vec<ContentPart>,
    /// Latest server payload for the item, for renderers that need
    /// tool-specific fields.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl OutputItem {
    pub fn part(&self, index: u32) -> Option<&ContentPart> {
        self.content.iter().find(|p| p.index == index)
    }

    /// Concatenated text of all text parts, in index order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|p| p.part_type == PartType::Text)
            .filter_map(ContentPart::as_text)
            .collect()
    }
}

/// Immutable result of a stream that reached its terminal success event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalizedResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub items: Vec<OutputItem>,
    pub invocations: Vec<ToolInvocation>,
    pub usage: Usage,
    /// Set when the server ended with `response.incomplete`.
    pub incomplete: bool,
    /// `incomplete_details.reason`, when the server gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl FinalizedResponse {
    /// Concatenated text of all message items.
    pub fn output_text(&self) -> String {
        self.items
            .iter()
            .filter(|item| item.item_type == ItemType::Message)
            .map(OutputItem::text)
            .collect()
    }

    pub fn item(&self, id: &str) -> Option<&OutputItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn invocation(&self, item_id: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|inv| inv.item_id == item_id)
    }
}
