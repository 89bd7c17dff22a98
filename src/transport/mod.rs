//! Transport collaborator: opens and resumes raw frame streams.

pub mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::StreamError;

/// Lazy sequence of raw frames, each decodable on its own.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

/// Opens transport legs for a streaming session.
///
/// Implementations own connection setup, authentication and any deadline;
/// the engine never retries a failed open.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the first leg of a stream.
    async fn open_stream(&self, request: &Value) -> Result<FrameStream, StreamError>;

    /// Open a continuation leg after an approval decision.
    ///
    /// `session_token` is the id of the response being continued; the same
    /// id is also carried in the body as `previous_response_id`.
    async fn resume_stream(
        &self,
        session_token: Option<&str>,
        request: &Value,
    ) -> Result<FrameStream, StreamError>;
}
