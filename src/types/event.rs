//! Typed stream events decoded from the server-push channel.

use serde::{Deserialize, Serialize};

use super::tool::{SafetyCheck, ToolKind};
use super::usage::WireUsage;

/// Which text buffer a text delta feeds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextChannel {
    OutputText,
    Refusal,
    ReasoningSummary,
    Reasoning,
}

/// Server-side progress phase of a hosted tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    InProgress,
    Searching,
    Interpreting,
    Generating,
    Completed,
    Failed,
}

/// Output item payload as sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WireItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub server_label: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub requires_approval: Option<bool>,
    #[serde(default)]
    pub approval_request_id: Option<String>,
    #[serde(default)]
    pub pending_safety_checks: Option<Vec<SafetyCheck>>,
    #[serde(default)]
    pub action: Option<serde_json::Value>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub outputs: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl WireItem {
    pub fn safety_checks(&self) -> &[SafetyCheck] {
        self.pending_safety_checks.as_deref().unwrap_or(&[])
    }

    pub fn reports_failure(&self) -> bool {
        self.status.as_deref() == Some("failed")
            || self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

/// Error block carried by failed responses and `error` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WireError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

/// Response envelope carried by `response.*` lifecycle events.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub incomplete_details: Option<serde_json::Value>,
}

/// Closed set of events the engine understands.
///
/// Every variant carries the server's `sequence_number`. Tags the decoder
/// does not know decode to [`StreamEvent::Unrecognized`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// `response.created`, `response.queued`, `response.in_progress`.
    ResponseOpened {
        sequence_number: u64,
        response: ResponseMeta,
    },
    OutputItemAdded {
        sequence_number: u64,
        output_index: Option<u32>,
        item: WireItem,
        raw: serde_json::Value,
    },
    OutputItemDone {
        sequence_number: u64,
        output_index: Option<u32>,
        item: WireItem,
        raw: serde_json::Value,
    },
    ContentPartAdded {
        sequence_number: u64,
        item_id: String,
        content_index: u32,
        part: Option<serde_json::Value>,
    },
    ContentPartDone {
        sequence_number: u64,
        item_id: String,
        content_index: u32,
        part: Option<serde_json::Value>,
    },
    TextDelta {
        sequence_number: u64,
        item_id: String,
        content_index: u32,
        channel: TextChannel,
        delta: String,
    },
    TextDone {
        sequence_number: u64,
        item_id: String,
        content_index: u32,
        channel: TextChannel,
        text: Option<String>,
    },
    AnnotationAdded {
        sequence_number: u64,
        item_id: String,
        content_index: u32,
        annotation: serde_json::Value,
    },
    ArgumentsDelta {
        sequence_number: u64,
        item_id: String,
        kind: ToolKind,
        delta: String,
    },
    ArgumentsDone {
        sequence_number: u64,
        item_id: String,
        kind: ToolKind,
        arguments: Option<String>,
        requires_approval: bool,
    },
    ImagePartial {
        sequence_number: u64,
        item_id: String,
        partial_image_index: u32,
        partial_image_b64: String,
    },
    ToolProgress {
        sequence_number: u64,
        item_id: String,
        kind: ToolKind,
        phase: ToolPhase,
    },
    ResponseCompleted {
        sequence_number: u64,
        response: ResponseMeta,
    },
    ResponseIncomplete {
        sequence_number: u64,
        response: ResponseMeta,
    },
    ResponseFailed {
        sequence_number: u64,
        response: ResponseMeta,
    },
    Error {
        sequence_number: u64,
        error: WireError,
    },
    Unrecognized {
        sequence_number: u64,
        event_type: String,
        raw: serde_json::Value,
    },
}

impl StreamEvent {
    pub fn sequence_number(&self) -> u64 {
        match self {
            Self::ResponseOpened { sequence_number, .. }
            | Self::OutputItemAdded { sequence_number, .. }
            | Self::OutputItemDone { sequence_number, .. }
            | Self::ContentPartAdded { sequence_number, .. }
            | Self::ContentPartDone { sequence_number, .. }
            | Self::TextDelta { sequence_number, .. }
            | Self::TextDone { sequence_number, .. }
            | Self::AnnotationAdded { sequence_number, .. }
            | Self::ArgumentsDelta { sequence_number, .. }
            | Self::ArgumentsDone { sequence_number, .. }
            | Self::ImagePartial { sequence_number, .. }
            | Self::ToolProgress { sequence_number, .. }
            | Self::ResponseCompleted { sequence_number, .. }
            | Self::ResponseIncomplete { sequence_number, .. }
            | Self::ResponseFailed { sequence_number, .. }
            | Self::Error { sequence_number, .. }
            | Self::Unrecognized { sequence_number, .. } => *sequence_number,
        }
    }

    /// The output item this event addresses, if any.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::OutputItemAdded { item, .. } | Self::OutputItemDone { item, .. } => {
                Some(&item.id)
            }
            Self::ContentPartAdded { item_id, .. }
            | Self::ContentPartDone { item_id, .. }
            | Self::TextDelta { item_id, .. }
            | Self::TextDone { item_id, .. }
            | Self::AnnotationAdded { item_id, .. }
            | Self::ArgumentsDelta { item_id, .. }
            | Self::ArgumentsDone { item_id, .. }
            | Self::ImagePartial { item_id, .. }
            | Self::ToolProgress { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    /// Terminal events end the current transport leg.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResponseCompleted { .. }
                | Self::ResponseIncomplete { .. }
                | Self::ResponseFailed { .. }
                | Self::Error { .. }
        )
    }

    /// Whether the tool registry needs to see this event.
    pub fn is_tool_related(&self) -> bool {
        matches!(
            self,
            Self::OutputItemAdded { .. }
                | Self::OutputItemDone { .. }
                | Self::ArgumentsDelta { .. }
                | Self::ArgumentsDone { .. }
                | Self::ImagePartial { .. }
                | Self::ToolProgress { .. }
                | Self::ResponseCompleted { .. }
                | Self::ResponseIncomplete { .. }
        )
    }
}
