//! Stream controller: owns one session from open to terminal outcome.

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::debug_enabled;
use crate::error::{ErrorDetail, StreamError};
use crate::request::continuation_body;
use crate::transport::{FrameStream, Transport};
use crate::types::response::FinalizedResponse;

use super::approval::{
    ActionExecutor, ApprovalDecision, ApprovalHandler, ApprovalKind, ApprovalPolicy,
    ApprovalRequest,
};
use super::decoder::EventDecoder;
use super::session::{ApplyOutcome, SessionStatus, Snapshot, StreamSession};

/// Callback used for streaming session events.
pub type SessionEventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Notifications delivered to the rendering collaborator, in apply order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Snapshot(Snapshot),
    ApprovalRequired(ApprovalRequest),
    Completed(FinalizedResponse),
    Failed { error: ErrorDetail, partial: Snapshot },
    Cancelled(Snapshot),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed(_) | Self::Failed { .. } | Self::Cancelled(_)
        )
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(FinalizedResponse),
    /// The partial response is for transient display only.
    Failed { error: ErrorDetail, partial: Snapshot },
    Cancelled { partial: Snapshot },
}

impl SessionOutcome {
    pub fn response(&self) -> Option<&FinalizedResponse> {
        match self {
            Self::Completed(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Request payload to start a session.
#[derive(Clone)]
pub struct StreamRequest {
    pub session_id: Uuid,
    /// Responses-API body; see [`crate::request::build_request_body`].
    pub body: Value,
    pub approval_policy: ApprovalPolicy,
    pub approval_handler: Option<ApprovalHandler>,
    pub action_executor: Option<Arc<dyn ActionExecutor>>,
    pub event_sink: Option<SessionEventSink>,
}

impl StreamRequest {
    pub fn new(body: Value) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            body,
            approval_policy: ApprovalPolicy::Ask,
            approval_handler: None,
            action_executor: None,
            event_sink: None,
        }
    }

    pub fn with_approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    pub fn with_approval_handler(mut self, handler: ApprovalHandler) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub fn with_action_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.action_executor = Some(executor);
        self
    }

    pub fn with_event_sink(mut self, sink: SessionEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }
}

/// Handle for an in-flight session.
#[derive(Debug)]
pub struct StreamHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    result_rx: oneshot::Receiver<SessionOutcome>,
}

impl StreamHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Request cancellation. Returns false if it was already requested.
    pub fn cancel(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Session events in emission order. The stream can be taken once.
    pub fn events(&mut self) -> BoxStream<'static, SessionEvent> {
        match self.events_rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub async fn wait(self) -> Result<SessionOutcome, StreamError> {
        self.result_rx
            .await
            .map_err(|_| StreamError::InvalidState("session task ended without an outcome".into()))
    }
}

/// Drives sessions over a [`Transport`].
#[derive(Clone)]
pub struct StreamController {
    transport: Arc<dyn Transport>,
}

impl StreamController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Spawn the session on the runtime and return its handle.
    pub fn start(&self, request: StreamRequest) -> StreamHandle {
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let session_id = request.session_id;
        let transport = Arc::clone(&self.transport);
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut emitter = SessionEmitter::new(
                request.event_sink.clone(),
                Some(events_tx),
                token.clone(),
            );
            let outcome = drive(transport.as_ref(), &request, token, &mut emitter).await;
            let _ = result_tx.send(outcome);
        });

        StreamHandle {
            session_id,
            cancel,
            events_rx: Some(events_rx),
            result_rx,
        }
    }

    /// Run the session on the current task, cancelling through `cancel`.
    pub async fn run(&self, request: StreamRequest, cancel: CancellationToken) -> SessionOutcome {
        let mut emitter = SessionEmitter::new(request.event_sink.clone(), None, cancel.clone());
        drive(self.transport.as_ref(), &request, cancel, &mut emitter).await
    }
}

/// Fans events out to the sink and the handle's channel.
///
/// Nothing is delivered after a terminal event, and only a terminal event
/// is delivered once cancellation has been requested.
struct SessionEmitter {
    sink: Option<SessionEventSink>,
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    cancel: CancellationToken,
    terminated: bool,
}

impl SessionEmitter {
    fn new(
        sink: Option<SessionEventSink>,
        tx: Option<mpsc::UnboundedSender<SessionEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            tx,
            cancel,
            terminated: false,
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        if self.terminated {
            return;
        }
        if self.cancel.is_cancelled() && !event.is_terminal() {
            return;
        }
        self.terminated = event.is_terminal();
        if let Some(sink) = &self.sink {
            (sink)(event.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    fn snapshot(&mut self, session: &StreamSession) {
        self.emit(SessionEvent::Snapshot(session.snapshot()));
    }
}

enum LegEnd {
    Completed(FinalizedResponse),
    /// Decisions were made during the leg; continue on a resume call.
    Resume,
}

async fn drive(
    transport: &dyn Transport,
    request: &StreamRequest,
    cancel: CancellationToken,
    emitter: &mut SessionEmitter,
) -> SessionOutcome {
    let mut session = StreamSession::new(
        request.session_id,
        request.approval_policy,
        request.approval_handler.clone(),
        cancel,
    );
    if debug_enabled() {
        debug!(
            session_id = %session.id(),
            model = ?request.body.get("model"),
            policy = %request.approval_policy,
            "stream session start"
        );
    }

    match run_legs(transport, request, &mut session, emitter).await {
        Ok(response) => {
            info!(
                session_id = %session.id(),
                response_id = ?response.id,
                legs = session.legs(),
                "stream session completed"
            );
            emitter.snapshot(&session);
            emitter.emit(SessionEvent::Completed(response.clone()));
            SessionOutcome::Completed(response)
        }
        Err(StreamError::Cancelled) => {
            session.deny_outstanding();
            session.set_status(SessionStatus::Cancelled);
            info!(session_id = %session.id(), "stream session cancelled");
            let partial = session.snapshot();
            emitter.emit(SessionEvent::Cancelled(partial.clone()));
            SessionOutcome::Cancelled { partial }
        }
        Err(err) => {
            session.deny_outstanding();
            let error = session.fail(&err);
            warn!(
                session_id = %session.id(),
                code = %error.code,
                error = %err,
                "stream session failed"
            );
            let partial = session.snapshot();
            emitter.emit(SessionEvent::Failed {
                error: error.clone(),
                partial: partial.clone(),
            });
            SessionOutcome::Failed { error, partial }
        }
    }
}

async fn run_legs(
    transport: &dyn Transport,
    request: &StreamRequest,
    session: &mut StreamSession,
    emitter: &mut SessionEmitter,
) -> Result<FinalizedResponse, StreamError> {
    let cancel = session.cancel_token().clone();
    let decoder = EventDecoder::new();

    session.begin_leg();
    emitter.snapshot(session);
    let mut frames = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        opened = transport.open_stream(&request.body) => opened?,
    };

    loop {
        match drive_leg(&mut frames, &decoder, request, session, emitter, &cancel).await? {
            LegEnd::Completed(response) => return Ok(response),
            LegEnd::Resume => {
                let resume = session.take_resume();
                let response_id = session.response_id().map(str::to_string).ok_or_else(|| {
                    StreamError::InvalidState("cannot resume without a response id".into())
                })?;
                debug!(
                    session_id = %session.id(),
                    response_id = %response_id,
                    inputs = resume.input.len(),
                    "resuming stream"
                );
                let body = continuation_body(&request.body, &response_id, resume.input);
                frames = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                    resumed = transport.resume_stream(Some(&response_id), &body) => resumed?,
                };
                for item_id in &resume.approved {
                    session.begin_execution(item_id)?;
                }
                session.begin_leg();
                emitter.snapshot(session);
            }
        }
    }
}

/// Wait for the decision on the pending request and queue its resume input.
/// An approved computer action runs here when an executor is configured.
async fn settle_approval(
    request: &StreamRequest,
    session: &mut StreamSession,
    emitter: &mut SessionEmitter,
    cancel: &CancellationToken,
) -> Result<(), StreamError> {
    let (approval, decision) = session.resolve_approval().await?;
    debug!(
        session_id = %session.id(),
        request_id = %approval.id,
        decision = %decision,
        "approval resolved"
    );
    session.record_decision(&approval, decision)?;
    emitter.snapshot(session);

    let executor = request
        .action_executor
        .as_ref()
        .filter(|_| approval.kind == ApprovalKind::ComputerSafetyCheck)
        .filter(|_| decision == ApprovalDecision::Approve);
    let output = match executor {
        Some(executor) => {
            session.begin_execution(&approval.item_id)?;
            emitter.snapshot(session);
            match execute_action(executor.as_ref(), &approval, cancel).await {
                Ok(output) => Some(output),
                Err(StreamError::Cancelled) => return Err(StreamError::Cancelled),
                Err(err) => {
                    session.fail_invocation(&approval.item_id)?;
                    return Err(err);
                }
            }
        }
        None => None,
    };
    session.queue_resume(&approval, decision, output);
    Ok(())
}

async fn execute_action(
    executor: &dyn ActionExecutor,
    approval: &ApprovalRequest,
    cancel: &CancellationToken,
) -> Result<Value, StreamError> {
    let action = approval.payload.get("action").cloned().unwrap_or(Value::Null);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Cancelled),
        output = executor.execute(&action) => output,
    }
}

async fn drive_leg(
    frames: &mut FrameStream,
    decoder: &EventDecoder,
    request: &StreamRequest,
    session: &mut StreamSession,
    emitter: &mut SessionEmitter,
    cancel: &CancellationToken,
) -> Result<LegEnd, StreamError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            next = frames.next() => next,
        };
        let Some(frame) = next else {
            if session.resume_pending() {
                debug!(session_id = %session.id(), "leg ended without a terminal event");
                return Ok(LegEnd::Resume);
            }
            return Err(StreamError::Transport(
                "stream ended before a terminal event".into(),
            ));
        };
        let frame = frame?;
        if debug_enabled() {
            debug!(session_id = %session.id(), frame = %frame, "raw frame");
        }

        let event = match decoder.decode(&frame) {
            Ok(event) => event,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(session_id = %session.id(), error = %err, "skipping undecodable frame");
                continue;
            }
        };

        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        match session.apply(&event)? {
            ApplyOutcome::Applied(delta) => {
                if delta.is_changed() {
                    emitter.snapshot(session);
                }
            }
            ApplyOutcome::Skipped(err) => {
                warn!(
                    session_id = %session.id(),
                    sequence_number = event.sequence_number(),
                    error = %err,
                    "skipping event"
                );
            }
            ApplyOutcome::ApprovalRequired(approval) => {
                info!(
                    session_id = %session.id(),
                    request_id = %approval.id,
                    kind = %approval.kind,
                    "approval required"
                );
                emitter.snapshot(session);
                emitter.emit(SessionEvent::ApprovalRequired(approval));
                // Later frames of this leg stay queued in the transport
                // until the decision is in.
                settle_approval(request, session, emitter, cancel).await?;
            }
            ApplyOutcome::LegEnded => return Ok(LegEnd::Resume),
            ApplyOutcome::Completed(response) => return Ok(LegEnd::Completed(response)),
            ApplyOutcome::Failed(detail) => {
                return Err(StreamError::server(detail.code, detail.message));
            }
        }
    }
}
