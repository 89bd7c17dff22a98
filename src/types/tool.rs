//! Tool invocation types tracked per stream.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Capability a tool invocation exercises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    Function,
    CodeInterpreter,
    ImageGeneration,
    WebSearch,
    FileSearch,
    Mcp,
    Computer,
}

impl ToolKind {
    /// Kinds whose invocations may be held behind an approval gate.
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Mcp | Self::Computer)
    }
}

/// Lifecycle state of a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolState {
    Opened,
    StreamingArguments,
    AwaitingApproval,
    Approved,
    Denied,
    Executing,
    Completed,
    Failed,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the invocation state machine.
    pub fn can_transition_to(self, next: ToolState) -> bool {
        use ToolState::*;
        match (self, next) {
            (Opened, StreamingArguments | AwaitingApproval | Completed | Failed) => true,
            (StreamingArguments, StreamingArguments | AwaitingApproval | Completed | Failed) => {
                true
            }
            (AwaitingApproval, Approved | Denied) => true,
            (Approved, Executing | Failed) => true,
            (Executing, Completed | Failed) => true,
            _ => false,
        }
    }
}

/// A pending safety check attached to a computer action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyCheck {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One tool call raised by the model mid-stream.
///
/// `arguments` is the raw concatenation of argument fragments; it is only
/// parsed into `parsed_arguments` once the call's "done" event arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_label: Option<String>,
    pub state: ToolState,
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_arguments: Option<serde_json::Value>,
    #[serde(default)]
    pub arguments_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_safety_checks: Vec<SafetyCheck>,
    /// For continuation items: the gated invocation this call executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
}

impl ToolInvocation {
    pub fn new(item_id: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            item_id: item_id.into(),
            call_id: None,
            kind,
            name: None,
            server_label: None,
            state: ToolState::Opened,
            arguments: String::new(),
            parsed_arguments: None,
            arguments_complete: false,
            error: None,
            pending_safety_checks: Vec::new(),
            approval_request_id: None,
            action: None,
        }
    }

    /// Matches either the output item id or the call id.
    pub fn matches(&self, id: &str) -> bool {
        self.item_id == id || self.call_id.as_deref() == Some(id)
    }
}
