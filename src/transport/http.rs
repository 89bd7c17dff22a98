//! Responses-API transport over HTTP server-sent events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::config::{debug_enabled, CredentialSource, StreamConfig};
use crate::error::StreamError;
use crate::stream::decoder::SseFramer;

use super::{FrameStream, Transport};

/// POSTs to `{base_url}/responses` and frames the SSE body.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
        timeout: Option<Duration>,
    ) -> Result<Self, StreamError> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(10);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn from_config(
        config: &StreamConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, StreamError> {
        Self::new(
            config.base_url.clone(),
            credentials,
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: &Value) -> Result<FrameStream, StreamError> {
        let url = format!("{}/responses", self.base_url);
        let mut body = request.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".to_string(), Value::Bool(true));
        }
        let api_key = self.credentials.api_key()?;

        debug!(url = %url, model = ?body.get("model"), "opening Responses stream");
        if debug_enabled() {
            debug!(body = %body, "Responses request body");
        }

        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(&api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        Ok(frame_stream(resp.bytes_stream()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: &Value) -> Result<FrameStream, StreamError> {
        self.post(request).await
    }

    async fn resume_stream(
        &self,
        session_token: Option<&str>,
        request: &Value,
    ) -> Result<FrameStream, StreamError> {
        debug!(previous_response_id = ?session_token, "resuming Responses stream");
        self.post(request).await
    }
}

/// Frame a body of SSE bytes, ending at `[DONE]` or end of body.
pub fn frame_stream<S, B, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut framer = SseFramer::new();
        futures::pin_mut!(bytes);
        let mut failed = false;
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err.into());
                    failed = true;
                    break;
                }
            };
            for frame in framer.push(chunk.as_ref()) {
                yield Ok(frame);
            }
            if framer.is_done() {
                break;
            }
        }
        if !failed {
            if let Some(frame) = framer.finish() {
                yield Ok(frame);
            }
        }
    })
}

/// Default headers for a bearer-token SSE request.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map a non-2xx open to an error.
pub fn status_to_error(status: u16, body: &str) -> StreamError {
    match status {
        401 | 403 => StreamError::Authentication(error_message(body)),
        429 => StreamError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => StreamError::api(status, error_message(body)),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("retry_after"))
            .and_then(Value::as_f64)
            .map(|s| (s * 1000.0) as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_maps_to_error_kind() {
        assert!(matches!(
            status_to_error(401, r#"{"error":{"message":"bad key"}}"#),
            StreamError::Authentication(msg) if msg == "bad key"
        ));
        assert!(matches!(
            status_to_error(429, r#"{"error":{"retry_after":1.5}}"#),
            StreamError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
        assert!(matches!(
            status_to_error(500, "upstream exploded"),
            StreamError::Api { status: 500, message } if message == "upstream exploded"
        ));
    }

    #[test]
    fn bearer_headers_request_event_stream() {
        let headers = bearer_headers("sk-test");
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers[ACCEPT], "text/event-stream");
    }

    #[tokio::test]
    async fn frame_stream_reassembles_split_chunks() {
        let chunks: Vec<Result<&'static [u8], StreamError>> = vec![
            Ok(b"data: {\"a\"".as_slice()),
            Ok(b":1}\n\nda".as_slice()),
            Ok(b"ta: {\"b\":2}\n\ndata: [DONE]\n\n".as_slice()),
        ];
        let frames: Vec<String> = frame_stream(futures::stream::iter(chunks))
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[tokio::test]
    async fn frame_stream_surfaces_body_errors() {
        let chunks: Vec<Result<&'static [u8], StreamError>> = vec![
            Ok(b"data: {}\n\n".as_slice()),
            Err(StreamError::Transport("connection reset".into())),
        ];
        let frames: Vec<Result<String, StreamError>> =
            frame_stream(futures::stream::iter(chunks)).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[1], Err(StreamError::Transport(_))));
    }
}
