//! Approval gate for MCP tool calls and computer-use safety checks.
//!
//! Both kinds share one suspend/resume handshake: the controller raises a
//! request, waits for a decision, then resumes the stream with the input
//! produced by [`resume_input`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::types::tool::{ToolInvocation, ToolKind};

/// Approval policy for gated invocations.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Deny every request without asking.
    Never,
    /// Ask the approval handler.
    #[default]
    Ask,
    /// Approve every request without asking.
    Always,
}

/// What is being approved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalKind {
    McpTool,
    ComputerSafetyCheck,
}

/// A pending request for a human (or policy) decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: String,
    pub kind: ApprovalKind,
    /// The blocked invocation.
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub summary: String,
    pub payload: Value,
}

impl ApprovalRequest {
    pub fn for_invocation(inv: &ToolInvocation) -> Self {
        let arguments = inv
            .parsed_arguments
            .clone()
            .unwrap_or_else(|| Value::String(inv.arguments.clone()));
        match inv.kind {
            ToolKind::Computer => {
                let summary = inv
                    .pending_safety_checks
                    .iter()
                    .filter_map(|check| check.message.as_deref().or(check.code.as_deref()))
                    .collect::<Vec<_>>()
                    .join("; ");
                Self {
                    id: inv.item_id.clone(),
                    kind: ApprovalKind::ComputerSafetyCheck,
                    item_id: inv.item_id.clone(),
                    call_id: inv.call_id.clone(),
                    summary: if summary.is_empty() {
                        "Confirm computer action".to_string()
                    } else {
                        summary
                    },
                    payload: json!({
                        "action": inv.action.clone().unwrap_or(Value::Null),
                        "pending_safety_checks": inv.pending_safety_checks,
                    }),
                }
            }
            _ => {
                let name = inv.name.as_deref().unwrap_or("tool");
                let summary = match inv.server_label.as_deref() {
                    Some(server) => format!("Allow {server} to run {name}"),
                    None => format!("Allow {name} to run"),
                };
                Self {
                    id: inv.item_id.clone(),
                    kind: ApprovalKind::McpTool,
                    item_id: inv.item_id.clone(),
                    call_id: inv.call_id.clone(),
                    summary,
                    payload: json!({
                        "server_label": inv.server_label,
                        "name": inv.name,
                        "arguments": arguments,
                    }),
                }
            }
        }
    }
}

/// Single-resolution decision for an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Async approval callback supplied by the UI collaborator.
pub type ApprovalHandler =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, ApprovalDecision> + Send + Sync>;

/// Performs an approved computer action and returns its output payload
/// (typically a screenshot).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Value) -> Result<Value, StreamError>;
}

/// Holds at most one outstanding [`ApprovalRequest`] for a stream.
pub struct ApprovalGate {
    policy: ApprovalPolicy,
    handler: Option<ApprovalHandler>,
    pending: Option<ApprovalRequest>,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("policy", &self.policy)
            .field("has_handler", &self.handler.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy, handler: Option<ApprovalHandler>) -> Self {
        Self {
            policy,
            handler,
            pending: None,
        }
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub fn pending(&self) -> Option<&ApprovalRequest> {
        self.pending.as_ref()
    }

    /// Register a request; fails if another is still unresolved.
    pub fn raise(&mut self, request: ApprovalRequest) -> Result<(), StreamError> {
        if let Some(pending) = &self.pending {
            return Err(StreamError::ApprovalPending(pending.id.clone()));
        }
        self.pending = Some(request);
        Ok(())
    }

    /// Wait for the decision on the pending request.
    ///
    /// Returns [`StreamError::Cancelled`] if `cancel` fires first; the
    /// caller treats that as a denial and tears the session down.
    pub async fn resolve(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(ApprovalRequest, ApprovalDecision), StreamError> {
        let Some(request) = self.pending.clone() else {
            return Err(StreamError::InvalidState("no approval request pending".into()));
        };
        if cancel.is_cancelled() {
            self.pending = None;
            return Err(StreamError::Cancelled);
        }
        let decision = match (self.policy, &self.handler) {
            (ApprovalPolicy::Always, _) => ApprovalDecision::Approve,
            (ApprovalPolicy::Never, _) | (ApprovalPolicy::Ask, None) => ApprovalDecision::Deny,
            (ApprovalPolicy::Ask, Some(handler)) => {
                let decision = handler(request.clone());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.pending = None;
                        return Err(StreamError::Cancelled);
                    }
                    decision = decision => decision,
                }
            }
        };
        self.pending = None;
        Ok((request, decision))
    }

    /// Raise and resolve in one step.
    pub async fn request(
        &mut self,
        request: ApprovalRequest,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, StreamError> {
        self.raise(request)?;
        self.resolve(cancel).await.map(|(_, decision)| decision)
    }
}

/// Continuation input items sent with the resume call.
pub fn resume_input(
    request: &ApprovalRequest,
    decision: ApprovalDecision,
    action_output: Option<Value>,
) -> Vec<Value> {
    match (request.kind, decision) {
        (ApprovalKind::McpTool, decision) => vec![json!({
            "type": "mcp_approval_response",
            "approval_request_id": request.id,
            "approve": decision == ApprovalDecision::Approve,
        })],
        (ApprovalKind::ComputerSafetyCheck, ApprovalDecision::Approve) => {
            let mut item = json!({
                "type": "computer_call_output",
                "call_id": request.call_id.as_deref().unwrap_or(&request.item_id),
                "acknowledged_safety_checks": request
                    .payload
                    .get("pending_safety_checks")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            });
            if let (Some(output), Some(map)) = (action_output, item.as_object_mut()) {
                map.insert("output".to_string(), output);
            }
            vec![item]
        }
        (ApprovalKind::ComputerSafetyCheck, ApprovalDecision::Deny) => {
            let reason = format!("The requested computer action was denied: {}", request.summary);
            vec![
                json!({
                    "type": "computer_call_output",
                    "call_id": request.call_id.as_deref().unwrap_or(&request.item_id),
                    "acknowledged_safety_checks": [],
                    "output": {"type": "input_text", "text": reason},
                }),
                json!({
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": reason}],
                }),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tool::SafetyCheck;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    fn mcp_request() -> ApprovalRequest {
        let mut inv = ToolInvocation::new("mcpr_1", ToolKind::Mcp);
        inv.name = Some("deploy".into());
        inv.server_label = Some("ops".into());
        inv.parsed_arguments = Some(json!({"env": "prod"}));
        ApprovalRequest::for_invocation(&inv)
    }

    fn computer_request() -> ApprovalRequest {
        let mut inv = ToolInvocation::new("cu_1", ToolKind::Computer);
        inv.call_id = Some("call_cu".into());
        inv.action = Some(json!({"type": "click"}));
        inv.pending_safety_checks = vec![SafetyCheck {
            id: "sc_1".into(),
            code: Some("sensitive_domain".into()),
            message: Some("Banking site".into()),
        }];
        ApprovalRequest::for_invocation(&inv)
    }

    fn handler(decision: ApprovalDecision) -> ApprovalHandler {
        Arc::new(move |_req| async move { decision }.boxed())
    }

    #[test]
    fn request_summaries_describe_the_action() {
        assert_eq!(mcp_request().summary, "Allow ops to run deploy");
        assert_eq!(mcp_request().payload["arguments"]["env"], "prod");
        let computer = computer_request();
        assert_eq!(computer.kind, ApprovalKind::ComputerSafetyCheck);
        assert_eq!(computer.summary, "Banking site");
    }

    #[tokio::test]
    async fn policy_decides_without_handler() {
        let cancel = CancellationToken::new();
        let mut always = ApprovalGate::new(ApprovalPolicy::Always, None);
        assert_eq!(
            always.request(mcp_request(), &cancel).await.unwrap(),
            ApprovalDecision::Approve
        );
        let mut never = ApprovalGate::new(
            ApprovalPolicy::Never,
            Some(handler(ApprovalDecision::Approve)),
        );
        assert_eq!(
            never.request(mcp_request(), &cancel).await.unwrap(),
            ApprovalDecision::Deny
        );
        let mut ask = ApprovalGate::new(ApprovalPolicy::Ask, None);
        assert_eq!(
            ask.request(mcp_request(), &cancel).await.unwrap(),
            ApprovalDecision::Deny
        );
        assert!(ask.pending().is_none());
    }

    #[tokio::test]
    async fn ask_policy_uses_handler() {
        let cancel = CancellationToken::new();
        let mut gate =
            ApprovalGate::new(ApprovalPolicy::Ask, Some(handler(ApprovalDecision::Approve)));
        gate.raise(mcp_request()).unwrap();
        let (request, decision) = gate.resolve(&cancel).await.unwrap();
        assert_eq!(request.id, "mcpr_1");
        assert_eq!(decision, ApprovalDecision::Approve);
    }

    #[test]
    fn only_one_request_may_be_pending() {
        let mut gate = ApprovalGate::new(ApprovalPolicy::Ask, None);
        gate.raise(mcp_request()).unwrap();
        let err = gate.raise(computer_request()).unwrap_err();
        assert!(matches!(err, StreamError::ApprovalPending(id) if id == "mcpr_1"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_waiting() {
        let cancel = CancellationToken::new();
        let pending: ApprovalHandler =
            Arc::new(|_req| futures::future::pending::<ApprovalDecision>().boxed());
        let mut gate = ApprovalGate::new(ApprovalPolicy::Ask, Some(pending));
        gate.raise(mcp_request()).unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move { trigger.cancel() });
        let err = gate.resolve(&cancel).await.unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));
        assert!(gate.pending().is_none());
    }

    #[test]
    fn mcp_resume_input_carries_decision() {
        let input = resume_input(&mcp_request(), ApprovalDecision::Deny, None);
        assert_eq!(
            input,
            vec![json!({
                "type": "mcp_approval_response",
                "approval_request_id": "mcpr_1",
                "approve": false,
            })]
        );
    }

    #[test]
    fn computer_resume_input_acknowledges_checks() {
        let screenshot = json!({"type": "computer_screenshot", "image_url": "data:image/png;base64,AA=="});
        let input = resume_input(
            &computer_request(),
            ApprovalDecision::Approve,
            Some(screenshot.clone()),
        );
        assert_eq!(input[0]["type"], "computer_call_output");
        assert_eq!(input[0]["call_id"], "call_cu");
        assert_eq!(input[0]["acknowledged_safety_checks"][0]["id"], "sc_1");
        assert_eq!(input[0]["output"], screenshot);

        let denied = resume_input(&computer_request(), ApprovalDecision::Deny, None);
        assert_eq!(denied[0]["type"], "computer_call_output");
        assert_eq!(denied[0]["call_id"], "call_cu");
        assert_eq!(denied[0]["acknowledged_safety_checks"], json!([]));
        assert_eq!(
            denied[0]["output"]["text"],
            "The requested computer action was denied: Banking site"
        );
        assert_eq!(denied[1]["role"], "user");
    }
}
