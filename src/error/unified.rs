//! Unified error classification and the user-visible error detail.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection drop, non-2xx open, body read failure.
    Transport,
    Authentication,
    RateLimit,
    /// The server reported a failed response or an `error` event.
    Server,
    /// Server/client desynchronization; the session cannot continue.
    Protocol,
    /// Recovered locally: the frame is logged and skipped.
    SoftDecode,
    /// Affects a single tool invocation only.
    Tool,
    Configuration,
    Serialization,
    Cancelled,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryRequest,
    CheckCredentials,
    CheckConfiguration,
    ReportProtocolIssue,
    None,
}

/// Machine-readable code plus a human-readable message, handed to the
/// rendering collaborator when a session fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
