//! Error types for the streaming engine.

pub mod unified;

pub use unified::{ErrorCategory, ErrorDetail, RecoverySuggestion};

use thiserror::Error;

use crate::types::tool::ToolState;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String, terminal: bool },

    #[error("Sequence regression: received {received} after {previous}")]
    SequenceRegression { previous: u64, received: u64 },

    #[error("Duplicate output item: {0}")]
    DuplicateItem(String),

    #[error("Unknown target: item {item_id}, content index {content_index:?}")]
    UnknownTarget {
        item_id: String,
        content_index: Option<u32>,
    },

    #[error("Late delta for finished target: item {item_id}, content index {content_index:?}")]
    LateDelta {
        item_id: String,
        content_index: Option<u32>,
    },

    #[error("Unrecognized event type: {0}")]
    UnrecognizedEventType(String),

    #[error("Invalid tool transition for {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: ToolState,
        to: ToolState,
    },

    #[error("Tool arguments for {item_id} could not be parsed: {message}")]
    ToolArguments { item_id: String, message: String },

    #[error("Approval already pending for {0}")]
    ApprovalPending(String),

    #[error("Server error ({code}): {message}")]
    Server { code: String, message: String },

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl StreamError {
    /// Create an API error for a non-2xx response.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a server-reported error.
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                _ => ErrorCategory::Transport,
            },
            Self::Network(_) | Self::Io(_) | Self::Transport(_) => ErrorCategory::Transport,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::MalformedFrame { terminal: true, .. } => ErrorCategory::Protocol,
            Self::MalformedFrame { terminal: false, .. }
            | Self::LateDelta { .. }
            | Self::UnrecognizedEventType(_)
            | Self::UnknownTarget { .. } => ErrorCategory::SoftDecode,
            Self::SequenceRegression { .. } | Self::DuplicateItem(_) => ErrorCategory::Protocol,
            Self::InvalidTransition { .. } | Self::ToolArguments { .. } => ErrorCategory::Tool,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::ApprovalPending(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error terminates the session.
    ///
    /// Soft decode errors are logged and skipped; tool errors only fail the
    /// affected invocation.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::SoftDecode | ErrorCategory::Tool
        )
    }

    /// Stable machine-readable code used in [`ErrorDetail`].
    pub fn code(&self) -> &str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Api { .. } => "api_error",
            Self::Network(_) => "network_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
            Self::Authentication(_) => "authentication",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transport(_) => "transport_error",
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::SequenceRegression { .. } => "sequence_regression",
            Self::DuplicateItem(_) => "duplicate_item",
            Self::UnknownTarget { .. } => "unknown_target",
            Self::LateDelta { .. } => "late_delta",
            Self::UnrecognizedEventType(_) => "unrecognized_event_type",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ToolArguments { .. } => "tool_arguments",
            Self::ApprovalPending(_) => "approval_pending",
            Self::Server { code, .. } => code.as_str(),
            Self::Cancelled => "cancelled",
            Self::InvalidState(_) => "invalid_state",
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Transport | ErrorCategory::RateLimit | ErrorCategory::Server => {
                RecoverySuggestion::RetryRequest
            }
            ErrorCategory::Protocol => RecoverySuggestion::ReportProtocolIssue,
            _ => RecoverySuggestion::None,
        }
    }
}

impl From<&StreamError> for ErrorDetail {
    fn from(err: &StreamError) -> Self {
        match err {
            StreamError::Server { code, message } => {
                ErrorDetail::new(code.clone(), message.clone())
            }
            other => ErrorDetail::new(other.code(), other.to_string()),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StreamError>;
