//! Convenience re-exports for common use.

pub use crate::config::{CredentialSource, EnvCredentials, StaticCredentials, StreamConfig};
pub use crate::error::{ErrorDetail, Result, StreamError};
pub use crate::request::{build_request_body, continuation_body, ReasoningEffort, ResponseSettings};
pub use crate::stream::{
    ActionExecutor, ApprovalDecision, ApprovalHandler, ApprovalPolicy, ApprovalRequest,
    SessionEvent, SessionOutcome, SessionStatus, Snapshot, StreamController, StreamHandle,
    StreamRequest,
};
pub use crate::tools::{AllowAllTools, ToolPermissions, ToolSettings, ToolSpec};
pub use crate::transport::{HttpTransport, Transport};
pub use crate::types::{FinalizedResponse, OutputItem, ToolInvocation, ToolKind, ToolState, Usage};
