//! Shared test helpers and scripted transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use openresponses::error::StreamError;
use openresponses::stream::{SessionEvent, SessionEventSink};
use openresponses::transport::{FrameStream, Transport};

/// One scripted transport leg.
pub enum Leg {
    /// Yield these frames, then end.
    Frames(Vec<String>),
    /// Yield these frames, then never produce another.
    Stalled(Vec<String>),
    /// Fail the open call.
    OpenError(StreamError),
}

/// A transport that replays canned legs and records every call.
#[derive(Default)]
pub struct ScriptedTransport {
    legs: Mutex<VecDeque<Leg>>,
    opened: Mutex<Vec<Value>>,
    resumed: Mutex<Vec<(Option<String>, Value)>>,
}

impl ScriptedTransport {
    pub fn new(legs: Vec<Leg>) -> Arc<Self> {
        Arc::new(Self {
            legs: Mutex::new(legs.into()),
            ..Default::default()
        })
    }

    pub fn opened(&self) -> Vec<Value> {
        self.opened.lock().unwrap().clone()
    }

    pub fn resumed(&self) -> Vec<(Option<String>, Value)> {
        self.resumed.lock().unwrap().clone()
    }

    fn next_leg(&self) -> Result<FrameStream, StreamError> {
        match self.legs.lock().unwrap().pop_front() {
            Some(Leg::Frames(frames)) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
            Some(Leg::Stalled(frames)) => Ok(stream::iter(frames.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Leg::OpenError(err)) => Err(err),
            None => Err(StreamError::Transport("no scripted leg left".into())),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_stream(&self, request: &Value) -> Result<FrameStream, StreamError> {
        self.opened.lock().unwrap().push(request.clone());
        self.next_leg()
    }

    async fn resume_stream(
        &self,
        session_token: Option<&str>,
        request: &Value,
    ) -> Result<FrameStream, StreamError> {
        self.resumed
            .lock()
            .unwrap()
            .push((session_token.map(str::to_string), request.clone()));
        self.next_leg()
    }
}

/// Collects every event delivered to a sink.
pub fn recorder() -> (SessionEventSink, Arc<Mutex<Vec<SessionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink: SessionEventSink = Arc::new(move |event| {
        sink_events.lock().unwrap().push(event);
    });
    (sink, events)
}

/// Builds frames with increasing sequence numbers.
pub struct Frames {
    seq: u64,
    frames: Vec<String>,
}

impl Frames {
    pub fn new() -> Self {
        Self {
            seq: 0,
            frames: Vec::new(),
        }
    }

    pub fn push(mut self, mut frame: Value) -> Self {
        frame["sequence_number"] = json!(self.seq);
        self.seq += 1;
        self.frames.push(frame.to_string());
        self
    }

    pub fn raw(mut self, frame: &str) -> Self {
        self.frames.push(frame.to_string());
        self
    }

    pub fn created(self, response_id: &str) -> Self {
        self.push(json!({
            "type": "response.created",
            "response": {"id": response_id, "model": "gpt-test", "status": "in_progress"},
        }))
    }

    pub fn message(self, item_id: &str, chunks: &[&str]) -> Self {
        let text: String = chunks.concat();
        let mut frames = self
            .push(json!({
                "type": "response.output_item.added",
                "output_index": 0,
                "item": {"id": item_id, "type": "message", "role": "assistant", "content": []},
            }))
            .push(json!({
                "type": "response.content_part.added",
                "item_id": item_id,
                "content_index": 0,
                "part": {"type": "output_text", "text": ""},
            }));
        for chunk in chunks {
            frames = frames.push(json!({
                "type": "response.output_text.delta",
                "item_id": item_id,
                "content_index": 0,
                "delta": chunk,
            }));
        }
        frames
            .push(json!({
                "type": "response.output_text.done",
                "item_id": item_id,
                "content_index": 0,
                "text": text,
            }))
            .push(json!({
                "type": "response.content_part.done",
                "item_id": item_id,
                "content_index": 0,
                "part": {"type": "output_text", "text": text},
            }))
            .push(json!({
                "type": "response.output_item.done",
                "output_index": 0,
                "item": {"id": item_id, "type": "message", "status": "completed",
                         "content": [{"type": "output_text", "text": text}]},
            }))
    }

    pub fn item_added(self, item: Value) -> Self {
        self.push(json!({"type": "response.output_item.added", "output_index": 0, "item": item}))
    }

    pub fn item_done(self, item: Value) -> Self {
        self.push(json!({"type": "response.output_item.done", "output_index": 0, "item": item}))
    }

    pub fn completed(self, response_id: &str) -> Self {
        self.push(json!({
            "type": "response.completed",
            "response": {
                "id": response_id,
                "status": "completed",
                "usage": {"input_tokens": 10, "output_tokens": 5, "total_tokens": 15},
            },
        }))
    }

    pub fn build(self) -> Vec<String> {
        self.frames
    }
}
