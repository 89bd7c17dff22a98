//! Per-stream state: accumulator, registry, gate, ordering and status.

use serde::Serialize;
use serde_json::Value;
use strum::Display;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorDetail, StreamError};
use crate::types::event::StreamEvent;
use crate::types::response::{FinalizedResponse, ItemType, OutputItem};
use crate::types::tool::{ToolInvocation, ToolState};
use crate::types::usage::Usage;

use super::accumulator::{ResponseAccumulator, SnapshotDelta};
use super::approval::{
    resume_input, ApprovalDecision, ApprovalGate, ApprovalHandler, ApprovalPolicy,
    ApprovalRequest,
};
use super::registry::{RegistryOutcome, ToolCallRegistry};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Immutable view of a session, handed to the rendering collaborator.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub response_id: Option<String>,
    pub model: Option<String>,
    pub items: Vec<OutputItem>,
    pub invocations: Vec<ToolInvocation>,
    pub usage: Usage,
    pub pending_approval: Option<ApprovalRequest>,
    pub last_sequence: Option<u64>,
    /// Set when the session ended without a finalized response.
    pub incomplete: bool,
    pub error: Option<ErrorDetail>,
}

impl Snapshot {
    /// Text of every message item, in item order.
    pub fn output_text(&self) -> String {
        self.items
            .iter()
            .filter(|item| item.item_type == ItemType::Message)
            .map(OutputItem::text)
            .collect()
    }

    pub fn invocation(&self, item_id: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|inv| inv.matches(item_id))
    }
}

/// Result of applying one event to the session.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(SnapshotDelta),
    /// A soft error; the event was logged and skipped.
    Skipped(StreamError),
    ApprovalRequired(ApprovalRequest),
    /// The leg ended with decisions that must be sent on a resume call.
    LegEnded,
    Completed(FinalizedResponse),
    Failed(ErrorDetail),
}

/// Decisions made during a leg, waiting to go out on the resume call.
#[derive(Debug, Default)]
pub struct PendingResume {
    pub input: Vec<Value>,
    /// Approved invocations the server runs once it receives `input`.
    pub approved: Vec<String>,
}

/// Root state of one streaming session.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    status: SessionStatus,
    accumulator: ResponseAccumulator,
    registry: ToolCallRegistry,
    gate: ApprovalGate,
    cancel: CancellationToken,
    last_sequence: Option<u64>,
    legs: u32,
    resume: PendingResume,
    error: Option<ErrorDetail>,
}

impl StreamSession {
    pub fn new(
        id: Uuid,
        policy: ApprovalPolicy,
        handler: Option<ApprovalHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            status: SessionStatus::Idle,
            accumulator: ResponseAccumulator::new(),
            registry: ToolCallRegistry::new(),
            gate: ApprovalGate::new(policy, handler),
            cancel,
            last_sequence: None,
            legs: 0,
            resume: PendingResume::default(),
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn response_id(&self) -> Option<&str> {
        self.accumulator.response_id()
    }

    pub fn legs(&self) -> u32 {
        self.legs
    }

    /// Start a new transport leg. The server numbers each leg from scratch,
    /// so the ordering baseline resets here.
    pub fn begin_leg(&mut self) {
        self.legs += 1;
        self.last_sequence = None;
        self.status = SessionStatus::Connecting;
    }

    /// Apply one decoded event.
    ///
    /// `Err` is always fatal; soft errors come back as
    /// [`ApplyOutcome::Skipped`].
    pub fn apply(&mut self, event: &StreamEvent) -> Result<ApplyOutcome, StreamError> {
        let received = event.sequence_number();
        if let Some(previous) = self.last_sequence {
            if received <= previous {
                return Err(StreamError::SequenceRegression { previous, received });
            }
        }
        self.last_sequence = Some(received);
        if self.status == SessionStatus::Connecting {
            self.status = SessionStatus::Active;
        }

        let mut delta = match self.accumulator.apply(event) {
            Ok(delta) => delta,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => return Ok(ApplyOutcome::Skipped(err)),
        };

        let leg_end = self.resume_pending() && matches!(delta, SnapshotDelta::Completed { .. });
        if leg_end {
            self.accumulator.reopen();
            self.status = SessionStatus::Active;
            return Ok(ApplyOutcome::LegEnded);
        }

        if event.is_tool_related() {
            let routed = self.registry.apply(event);
            self.fail_items_of_failed_invocations();
            match routed {
                Ok(RegistryOutcome::ApprovalRequired(request)) => {
                    self.gate.raise(request.clone())?;
                    self.status = SessionStatus::AwaitingApproval;
                    return Ok(ApplyOutcome::ApprovalRequired(request));
                }
                Ok(RegistryOutcome::Updated { item_id }) if !delta.is_changed() => {
                    delta = SnapshotDelta::Item { item_id };
                }
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => return Ok(ApplyOutcome::Skipped(err)),
            }
        }

        match delta {
            SnapshotDelta::Completed { .. } => {
                let response = self
                    .accumulator
                    .finalize(self.registry.invocations().to_vec())
                    .ok_or_else(|| StreamError::InvalidState("response was not frozen".into()))?;
                self.status = SessionStatus::Completed;
                Ok(ApplyOutcome::Completed(response))
            }
            SnapshotDelta::Failed(detail) => {
                self.status = SessionStatus::Failed;
                self.error = Some(detail.clone());
                Ok(ApplyOutcome::Failed(detail))
            }
            delta => Ok(ApplyOutcome::Applied(delta)),
        }
    }

    /// A failed invocation fails its output item, whatever status the
    /// server reported for it.
    fn fail_items_of_failed_invocations(&mut self) {
        for inv in self
            .registry
            .invocations()
            .iter()
            .filter(|inv| inv.state == ToolState::Failed)
        {
            if self.accumulator.mark_failed(&inv.item_id) {
                tracing::debug!(
                    session_id = %self.id,
                    item_id = %inv.item_id,
                    "output item failed with its tool call"
                );
            }
        }
    }

    /// Wait for the decision on the pending approval request.
    pub async fn resolve_approval(
        &mut self,
    ) -> Result<(ApprovalRequest, ApprovalDecision), StreamError> {
        self.gate.resolve(&self.cancel).await
    }

    /// Record a decision on the gated invocation.
    pub fn record_decision(
        &mut self,
        request: &ApprovalRequest,
        decision: ApprovalDecision,
    ) -> Result<(), StreamError> {
        match decision {
            ApprovalDecision::Approve => self.registry.approve(&request.item_id)?,
            ApprovalDecision::Deny => self.registry.deny(&request.item_id)?,
        }
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Mark an approved invocation as executing.
    pub fn begin_execution(&mut self, item_id: &str) -> Result<(), StreamError> {
        self.registry.begin_execution(item_id)
    }

    /// Mark an invocation failed, along with its output item.
    pub fn fail_invocation(&mut self, item_id: &str) -> Result<(), StreamError> {
        self.registry.transition(item_id, ToolState::Failed)?;
        self.fail_items_of_failed_invocations();
        Ok(())
    }

    /// Queue the continuation input for a decided request. Approved
    /// invocations not yet executing start executing once the resume call is out.
    pub fn queue_resume(
        &mut self,
        request: &ApprovalRequest,
        decision: ApprovalDecision,
        action_output: Option<Value>,
    ) {
        self.resume
            .input
            .extend(resume_input(request, decision, action_output));
        let executing = self
            .registry
            .get(&request.item_id)
            .is_some_and(|inv| inv.state == ToolState::Executing);
        if decision == ApprovalDecision::Approve && !executing {
            self.resume.approved.push(request.item_id.clone());
        }
    }

    pub fn resume_pending(&self) -> bool {
        !self.resume.input.is_empty()
    }

    pub fn take_resume(&mut self) -> PendingResume {
        std::mem::take(&mut self.resume)
    }

    /// Deny anything still gated; used on teardown.
    pub fn deny_outstanding(&mut self) {
        let gated: Vec<String> = self
            .registry
            .awaiting_approval()
            .map(|inv| inv.item_id.clone())
            .collect();
        for item_id in gated {
            if let Err(err) = self.registry.transition(&item_id, ToolState::Denied) {
                tracing::warn!(
                    session_id = %self.id,
                    error = %err,
                    "could not deny gated invocation"
                );
            }
        }
    }

    /// Mark the session failed and return the user-visible detail.
    pub fn fail(&mut self, err: &StreamError) -> ErrorDetail {
        let detail = self.error.clone().unwrap_or_else(|| ErrorDetail::from(err));
        self.error = Some(detail.clone());
        self.status = SessionStatus::Failed;
        detail
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session_id: self.id,
            status: self.status,
            response_id: self.accumulator.response_id().map(str::to_string),
            model: self.accumulator.model().map(str::to_string),
            items: self.accumulator.items().to_vec(),
            invocations: self.registry.invocations().to_vec(),
            usage: self.accumulator.usage().clone(),
            pending_approval: self.gate.pending().cloned(),
            last_sequence: self.last_sequence,
            incomplete: matches!(self.status, SessionStatus::Failed | SessionStatus::Cancelled),
            error: self.error.clone(),
        }
    }
}
