//! Streaming engine: decode, accumulate, track tools, gate and drive.

pub mod accumulator;
pub mod approval;
pub mod controller;
pub mod decoder;
pub mod registry;
pub mod session;

pub use accumulator::{ResponseAccumulator, SnapshotDelta};
pub use approval::{
    resume_input, ActionExecutor, ApprovalDecision, ApprovalGate, ApprovalHandler, ApprovalKind,
    ApprovalPolicy, ApprovalRequest,
};
pub use controller::{
    SessionEvent, SessionEventSink, SessionOutcome, StreamController, StreamHandle, StreamRequest,
};
pub use decoder::{EventDecoder, SseFramer};
pub use registry::{RegistryOutcome, ToolCallRegistry};
pub use session::{ApplyOutcome, PendingResume, SessionStatus, Snapshot, StreamSession};
