//! Per-stream table of tool invocations.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::StreamError;
use crate::types::event::{StreamEvent, ToolPhase, WireItem};
use crate::types::response::ItemType;
use crate::types::tool::{ToolInvocation, ToolKind, ToolState};

use super::approval::ApprovalRequest;

/// Result of routing one event through the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryOutcome {
    Unchanged,
    Updated { item_id: String },
    /// A gated invocation reached `awaiting_approval`.
    ApprovalRequired(ApprovalRequest),
}

/// Tracks one [`ToolInvocation`] per tool-bearing output item.
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    invocations: Vec<ToolInvocation>,
    /// Items whose argument text is free-form rather than JSON.
    freeform: HashSet<String>,
}

impl ToolCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    pub fn get(&self, id: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|inv| inv.matches(id))
    }

    /// Invocations currently waiting on a decision.
    pub fn awaiting_approval(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.invocations
            .iter()
            .filter(|inv| inv.state == ToolState::AwaitingApproval)
    }

    /// Route a tool-related event.
    pub fn apply(&mut self, event: &StreamEvent) -> Result<RegistryOutcome, StreamError> {
        match event {
            StreamEvent::OutputItemAdded { item, .. } => Ok(self.open(item)),
            StreamEvent::ArgumentsDelta { item_id, delta, .. } => {
                self.append_arguments(item_id, delta)
            }
            StreamEvent::ArgumentsDone {
                item_id,
                arguments,
                requires_approval,
                ..
            } => self.finish_arguments(item_id, arguments.as_deref(), *requires_approval),
            StreamEvent::ToolProgress { item_id, phase, .. } => {
                if *phase != ToolPhase::Failed {
                    return Ok(RegistryOutcome::Unchanged);
                }
                let Some(inv) = self.find_mut(item_id) else {
                    return Ok(RegistryOutcome::Unchanged);
                };
                if inv.state.is_terminal() {
                    return Ok(RegistryOutcome::Unchanged);
                }
                fail(inv, "tool reported failure");
                Ok(updated(item_id))
            }
            StreamEvent::OutputItemDone { item, .. } => self.finish_item(item),
            StreamEvent::ResponseCompleted { .. } | StreamEvent::ResponseIncomplete { .. } => {
                Ok(self.settle_executing())
            }
            _ => Ok(RegistryOutcome::Unchanged),
        }
    }

    /// Record an approve decision.
    pub fn approve(&mut self, item_id: &str) -> Result<(), StreamError> {
        self.transition(item_id, ToolState::Approved)
    }

    /// Record a deny decision; denial is terminal.
    pub fn deny(&mut self, item_id: &str) -> Result<(), StreamError> {
        self.transition(item_id, ToolState::Denied)
    }

    /// Mark an approved invocation as executing once its resume call is issued.
    pub fn begin_execution(&mut self, item_id: &str) -> Result<(), StreamError> {
        self.transition(item_id, ToolState::Executing)
    }

    /// Apply one state-machine edge, rejecting anything the machine forbids.
    pub fn transition(&mut self, item_id: &str, to: ToolState) -> Result<(), StreamError> {
        let inv = self.find_mut(item_id).ok_or_else(|| StreamError::UnknownTarget {
            item_id: item_id.to_string(),
            content_index: None,
        })?;
        if !inv.state.can_transition_to(to) {
            return Err(StreamError::InvalidTransition {
                item_id: item_id.to_string(),
                from: inv.state,
                to,
            });
        }
        inv.state = to;
        Ok(())
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ToolInvocation> {
        self.invocations.iter_mut().find(|inv| inv.matches(id))
    }

    fn open(&mut self, item: &WireItem) -> RegistryOutcome {
        let item_type = ItemType::from(item.item_type.as_str());
        let Some(kind) = item_type.tool_kind() else {
            return RegistryOutcome::Unchanged;
        };
        if self.get(&item.id).is_some() {
            return RegistryOutcome::Unchanged;
        }
        if matches!(
            item_type,
            ItemType::CustomToolCall | ItemType::CodeInterpreterCall
        ) {
            self.freeform.insert(item.id.clone());
        }
        let mut inv = ToolInvocation::new(item.id.clone(), kind);
        absorb_item(&mut inv, item);
        if let Some(arguments) = item.arguments.as_deref().or(item.code.as_deref()) {
            inv.arguments.push_str(arguments);
        }
        tracing::debug!(item_id = %item.id, kind = %kind, "tool invocation opened");
        self.invocations.push(inv);
        updated(&item.id)
    }

    fn append_arguments(
        &mut self,
        item_id: &str,
        delta: &str,
    ) -> Result<RegistryOutcome, StreamError> {
        let inv = self
            .find_mut(item_id)
            .ok_or_else(|| StreamError::UnknownTarget {
                item_id: item_id.to_string(),
                content_index: None,
            })?;
        if inv.arguments_complete || inv.state.is_terminal() {
            return Err(StreamError::LateDelta {
                item_id: item_id.to_string(),
                content_index: None,
            });
        }
        if !inv.state.can_transition_to(ToolState::StreamingArguments) {
            return Err(StreamError::InvalidTransition {
                item_id: item_id.to_string(),
                from: inv.state,
                to: ToolState::StreamingArguments,
            });
        }
        inv.state = ToolState::StreamingArguments;
        inv.arguments.push_str(delta);
        Ok(updated(item_id))
    }

    fn finish_arguments(
        &mut self,
        item_id: &str,
        arguments: Option<&str>,
        requires_approval: bool,
    ) -> Result<RegistryOutcome, StreamError> {
        let inv = self
            .invocations
            .iter_mut()
            .find(|inv| inv.matches(item_id))
            .ok_or_else(|| StreamError::UnknownTarget {
                item_id: item_id.to_string(),
                content_index: None,
            })?;
        if inv.arguments_complete || inv.state.is_terminal() {
            return Ok(RegistryOutcome::Unchanged);
        }
        let freeform = self.freeform.contains(&inv.item_id);
        if let Some(arguments) = arguments {
            inv.arguments = arguments.to_string();
        }
        if !seal_arguments(inv, freeform) {
            return Ok(updated(item_id));
        }
        if requires_approval && inv.kind.is_gated() {
            return Ok(gate(inv));
        }
        if inv.kind == ToolKind::Function {
            inv.state = ToolState::Completed;
        }
        Ok(updated(item_id))
    }

    fn finish_item(&mut self, item: &WireItem) -> Result<RegistryOutcome, StreamError> {
        let item_type = ItemType::from(item.item_type.as_str());
        if item_type.tool_kind().is_none() {
            return Ok(RegistryOutcome::Unchanged);
        }
        if self.get(&item.id).is_none() {
            self.open(item);
        }
        let freeform = self.freeform.contains(&item.id);
        let Some(inv) = self.find_mut(&item.id) else {
            return Ok(RegistryOutcome::Unchanged);
        };
        if inv.state.is_terminal() || inv.state == ToolState::AwaitingApproval {
            return Ok(RegistryOutcome::Unchanged);
        }
        absorb_item(inv, item);

        if !inv.arguments_complete {
            if let Some(arguments) = item.arguments.as_deref().or(item.code.as_deref()) {
                inv.arguments = arguments.to_string();
            }
            if !seal_arguments(inv, freeform) {
                return Ok(updated(&item.id));
            }
        }

        if item.reports_failure() {
            let message = item
                .error
                .as_ref()
                .map(error_text)
                .unwrap_or_else(|| "tool call failed".to_string());
            fail(inv, message);
        } else if needs_approval(&item_type, inv, item) {
            return Ok(gate(inv));
        } else if inv.state != ToolState::Completed {
            inv.state = ToolState::Completed;
        }
        let failed = inv.state == ToolState::Failed;
        let error = inv.error.clone();

        if let Some(linked) = item.approval_request_id.as_deref() {
            self.settle_linked(linked, failed, error);
        }
        Ok(updated(&item.id))
    }

    /// A continuation item executed the gated invocation `linked`.
    fn settle_linked(&mut self, linked: &str, failed: bool, error: Option<String>) {
        let Some(gated) = self.find_mut(linked) else {
            return;
        };
        if !matches!(gated.state, ToolState::Approved | ToolState::Executing) {
            return;
        }
        if failed {
            gated.state = ToolState::Failed;
            gated.error = error;
        } else {
            gated.state = ToolState::Completed;
        }
    }

    fn settle_executing(&mut self) -> RegistryOutcome {
        let mut changed = None;
        for inv in self
            .invocations
            .iter_mut()
            .filter(|inv| inv.state == ToolState::Executing)
        {
            inv.state = ToolState::Completed;
            changed = Some(inv.item_id.clone());
        }
        match changed {
            Some(item_id) => RegistryOutcome::Updated { item_id },
            None => RegistryOutcome::Unchanged,
        }
    }
}

fn updated(item_id: &str) -> RegistryOutcome {
    RegistryOutcome::Updated {
        item_id: item_id.to_string(),
    }
}

fn absorb_item(inv: &mut ToolInvocation, item: &WireItem) {
    if item.call_id.is_some() {
        inv.call_id = item.call_id.clone();
    }
    if item.name.is_some() {
        inv.name = item.name.clone();
    }
    if item.server_label.is_some() {
        inv.server_label = item.server_label.clone();
    }
    if item.action.is_some() {
        inv.action = item.action.clone();
    }
    if item.approval_request_id.is_some() {
        inv.approval_request_id = item.approval_request_id.clone();
    }
    if let Some(checks) = &item.pending_safety_checks {
        inv.pending_safety_checks = checks.clone();
    }
}

/// Parse the assembled argument text. Returns `false` when parsing failed
/// and the invocation was marked failed.
fn seal_arguments(inv: &mut ToolInvocation, freeform: bool) -> bool {
    inv.arguments_complete = true;
    if freeform {
        inv.parsed_arguments = Some(Value::String(inv.arguments.clone()));
        return true;
    }
    let text = inv.arguments.trim();
    if text.is_empty() {
        inv.parsed_arguments = Some(Value::Object(Default::default()));
        return true;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            inv.parsed_arguments = Some(value);
            true
        }
        Err(err) => {
            let err = StreamError::ToolArguments {
                item_id: inv.item_id.clone(),
                message: err.to_string(),
            };
            tracing::warn!(item_id = %inv.item_id, error = %err, "tool arguments rejected");
            fail(inv, err.to_string());
            false
        }
    }
}

fn fail(inv: &mut ToolInvocation, message: impl Into<String>) {
    inv.state = ToolState::Failed;
    inv.error = Some(message.into());
}

fn needs_approval(item_type: &ItemType, inv: &ToolInvocation, item: &WireItem) -> bool {
    match inv.kind {
        ToolKind::Mcp => {
            *item_type == ItemType::McpApprovalRequest || item.requires_approval == Some(true)
        }
        ToolKind::Computer => !inv.pending_safety_checks.is_empty(),
        _ => false,
    }
}

fn gate(inv: &mut ToolInvocation) -> RegistryOutcome {
    inv.state = ToolState::AwaitingApproval;
    tracing::debug!(item_id = %inv.item_id, kind = %inv.kind, "tool invocation awaiting approval");
    RegistryOutcome::ApprovalRequired(ApprovalRequest::for_invocation(inv))
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tool::SafetyCheck;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn added(seq: u64, value: Value) -> StreamEvent {
        StreamEvent::OutputItemAdded {
            sequence_number: seq,
            output_index: Some(0),
            item: serde_json::from_value(value.clone()).unwrap(),
            raw: value,
        }
    }

    fn done(seq: u64, value: Value) -> StreamEvent {
        StreamEvent::OutputItemDone {
            sequence_number: seq,
            output_index: Some(0),
            item: serde_json::from_value(value.clone()).unwrap(),
            raw: value,
        }
    }

    fn args_delta(seq: u64, item_id: &str, delta: &str) -> StreamEvent {
        StreamEvent::ArgumentsDelta {
            sequence_number: seq,
            item_id: item_id.into(),
            kind: ToolKind::Function,
            delta: delta.into(),
        }
    }

    fn args_done(seq: u64, item_id: &str, requires_approval: bool) -> StreamEvent {
        StreamEvent::ArgumentsDone {
            sequence_number: seq,
            item_id: item_id.into(),
            kind: ToolKind::Mcp,
            arguments: None,
            requires_approval,
        }
    }

    #[test]
    fn function_arguments_parse_only_when_done() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "fc_1", "type": "function_call", "call_id": "call_1", "name": "lookup"})))
            .unwrap();
        reg.apply(&args_delta(2, "fc_1", "{\"city\":")).unwrap();
        assert_eq!(reg.get("call_1").unwrap().parsed_arguments, None);
        reg.apply(&args_delta(3, "call_1", "\"Paris\"}")).unwrap();
        reg.apply(&args_done(4, "fc_1", false)).unwrap();

        let inv = reg.get("fc_1").unwrap();
        assert_eq!(inv.state, ToolState::Completed);
        assert_eq!(inv.parsed_arguments, Some(json!({"city": "Paris"})));
    }

    #[test]
    fn unparseable_arguments_fail_the_invocation() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "fc_1", "type": "function_call"})))
            .unwrap();
        reg.apply(&args_delta(2, "fc_1", "{\"city\":")).unwrap();
        reg.apply(&args_done(3, "fc_1", false)).unwrap();

        let inv = reg.get("fc_1").unwrap();
        assert_eq!(inv.state, ToolState::Failed);
        assert!(inv.parsed_arguments.is_none());
        assert!(inv.error.is_some());
    }

    #[test]
    fn mcp_call_requiring_approval_is_gated() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "mcp_2", "type": "mcp_call", "name": "search", "server_label": "docs"})))
            .unwrap();
        reg.apply(&args_delta(2, "mcp_2", "{\"q\":")).unwrap();
        reg.apply(&args_delta(3, "mcp_2", "\"rust\"}")).unwrap();
        let outcome = reg.apply(&args_done(4, "mcp_2", true)).unwrap();

        let RegistryOutcome::ApprovalRequired(request) = outcome else {
            panic!("expected approval request, got {outcome:?}");
        };
        assert_eq!(request.item_id, "mcp_2");
        assert_eq!(request.payload["arguments"], json!({"q": "rust"}));
        assert_eq!(reg.get("mcp_2").unwrap().state, ToolState::AwaitingApproval);
        assert_eq!(reg.awaiting_approval().count(), 1);
    }

    #[test]
    fn executing_requires_prior_approval() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "mcp_2", "type": "mcp_call"})))
            .unwrap();
        reg.apply(&args_done(2, "mcp_2", true)).unwrap();

        let err = reg.begin_execution("mcp_2").unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidTransition {
                from: ToolState::AwaitingApproval,
                to: ToolState::Executing,
                ..
            }
        ));

        reg.deny("mcp_2").unwrap();
        assert!(reg.begin_execution("mcp_2").is_err());
        assert_eq!(reg.get("mcp_2").unwrap().state, ToolState::Denied);
    }

    #[test]
    fn approval_request_item_links_to_continuation() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "mcpr_1", "type": "mcp_approval_request", "name": "deploy", "server_label": "ops", "arguments": "{}"})))
            .unwrap();
        let outcome = reg
            .apply(&done(2, json!({"id": "mcpr_1", "type": "mcp_approval_request", "name": "deploy", "server_label": "ops", "arguments": "{}"})))
            .unwrap();
        assert!(matches!(outcome, RegistryOutcome::ApprovalRequired(_)));

        reg.approve("mcpr_1").unwrap();
        reg.begin_execution("mcpr_1").unwrap();

        reg.apply(&added(0, json!({"id": "mcp_9", "type": "mcp_call", "approval_request_id": "mcpr_1"})))
            .unwrap();
        reg.apply(&done(3, json!({"id": "mcp_9", "type": "mcp_call", "status": "completed",
                                 "approval_request_id": "mcpr_1", "output": "ok"})))
            .unwrap();
        assert_eq!(reg.get("mcpr_1").unwrap().state, ToolState::Completed);
        assert_eq!(reg.get("mcp_9").unwrap().state, ToolState::Completed);
    }

    #[test]
    fn computer_call_with_safety_checks_is_gated() {
        let mut reg = ToolCallRegistry::new();
        let item = json!({"id": "cu_1", "type": "computer_call", "call_id": "call_cu",
                          "action": {"type": "click", "x": 4, "y": 2},
                          "pending_safety_checks": [{"id": "sc_1", "code": "sensitive_domain", "message": "Banking site"}]});
        reg.apply(&added(1, item.clone())).unwrap();
        let RegistryOutcome::ApprovalRequired(request) = reg.apply(&done(2, item)).unwrap() else {
            panic!("expected approval request");
        };
        assert_eq!(request.call_id.as_deref(), Some("call_cu"));
        assert_eq!(
            reg.get("cu_1").unwrap().pending_safety_checks,
            vec![SafetyCheck {
                id: "sc_1".into(),
                code: Some("sensitive_domain".into()),
                message: Some("Banking site".into()),
            }]
        );
    }

    #[test]
    fn informational_tools_complete_on_item_done() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "ws_1", "type": "web_search_call"})))
            .unwrap();
        reg.apply(&done(2, json!({"id": "ws_1", "type": "web_search_call", "status": "completed"})))
            .unwrap();
        assert_eq!(reg.get("ws_1").unwrap().state, ToolState::Completed);
    }

    #[test]
    fn failed_tool_only_fails_that_invocation() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "ci_1", "type": "code_interpreter_call"})))
            .unwrap();
        reg.apply(&added(2, json!({"id": "ws_1", "type": "web_search_call"})))
            .unwrap();
        reg.apply(&done(3, json!({"id": "ci_1", "type": "code_interpreter_call", "status": "failed",
                                 "error": {"message": "kernel died"}})))
            .unwrap();
        reg.apply(&done(4, json!({"id": "ws_1", "type": "web_search_call", "status": "completed"})))
            .unwrap();

        let ci = reg.get("ci_1").unwrap();
        assert_eq!(ci.state, ToolState::Failed);
        assert_eq!(ci.error.as_deref(), Some("kernel died"));
        assert_eq!(reg.get("ws_1").unwrap().state, ToolState::Completed);
    }

    #[test]
    fn arguments_after_done_are_late() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "fc_1", "type": "function_call"})))
            .unwrap();
        reg.apply(&args_done(2, "fc_1", false)).unwrap();
        let err = reg.apply(&args_delta(3, "fc_1", "x")).unwrap_err();
        assert!(matches!(err, StreamError::LateDelta { .. }));
        assert_eq!(reg.get("fc_1").unwrap().parsed_arguments, Some(json!({})));
    }

    #[test]
    fn code_interpreter_code_is_not_parsed_as_json() {
        let mut reg = ToolCallRegistry::new();
        reg.apply(&added(1, json!({"id": "ci_1", "type": "code_interpreter_call"})))
            .unwrap();
        reg.apply(&args_delta(2, "ci_1", "print(")).unwrap();
        reg.apply(&args_delta(3, "ci_1", "6*7)")).unwrap();
        reg.apply(&args_done(4, "ci_1", false)).unwrap();
        let inv = reg.get("ci_1").unwrap();
        assert_eq!(inv.parsed_arguments, Some(json!("print(6*7)")));
        assert_eq!(inv.state, ToolState::StreamingArguments);
    }
}
