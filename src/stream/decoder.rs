//! Wire framing and event decoding.
//!
//! [`SseFramer`] turns the transport's byte chunks into frames (one SSE
//! event's joined `data:` lines). [`EventDecoder`] turns one frame into a
//! [`StreamEvent`] by dispatching on its `type` tag.

use serde::de::{DeserializeOwned, Error as _};
use serde::Deserialize;
use serde_json::Value;

use crate::error::StreamError;
use crate::types::event::{
    ResponseMeta, StreamEvent, TextChannel, ToolPhase, WireError, WireItem,
};
use crate::types::tool::ToolKind;

const DONE_SENTINEL: &str = "[DONE]";

const TERMINAL_TAGS: [&str; 4] = [
    "response.completed",
    "response.done",
    "response.failed",
    "response.incomplete",
];

/// Incremental splitter from SSE bytes into event frames.
///
/// Lines are split on raw bytes so multi-byte characters cut across chunk
/// boundaries survive intact.
#[derive(Debug, Default)]
pub struct SseFramer {
    bytes: Vec<u8>,
    pending_data: Vec<String>,
    done: bool,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.bytes.extend_from_slice(chunk);
        while let Some(pos) = self.bytes.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.accept_line(line.trim_end_matches(|c| c == '\n' || c == '\r'))
            {
                frames.push(frame);
            }
            if self.done {
                self.bytes.clear();
                break;
            }
        }
        frames
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        if !self.bytes.is_empty() {
            let rest = std::mem::take(&mut self.bytes);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.accept_line(rest.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.flush_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            self.pending_data.push(rest.to_string());
        }
        // `event:`, `id:` and `retry:` carry nothing the decoder needs.
        None
    }

    fn flush_event(&mut self) -> Option<String> {
        if self.pending_data.is_empty() {
            return None;
        }
        let data = self.pending_data.join("\n");
        self.pending_data.clear();
        if data == DONE_SENTINEL {
            self.done = true;
            return None;
        }
        Some(data)
    }
}

/// Structural decoder from one frame to one [`StreamEvent`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one frame.
    ///
    /// Unknown tags decode to [`StreamEvent::Unrecognized`]. Frames that are
    /// not JSON, lack `type`/`sequence_number`, or do not match the shape of
    /// their tag fail with [`StreamError::MalformedFrame`]; `terminal` is set
    /// when the frame would have ended the response.
    pub fn decode(&self, frame: &str) -> Result<StreamEvent, StreamError> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| malformed(frame_names_terminal(frame), e.to_string()))?;
        let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_owned)
        else {
            return Err(malformed(frame_names_terminal(frame), "missing event type"));
        };
        let terminal = TERMINAL_TAGS.contains(&event_type.as_str());
        let sequence_number = value
            .get("sequence_number")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(terminal, format!("{event_type}: missing sequence_number")))?;
        decode_tagged(&event_type, sequence_number, value)
            .map_err(|e| malformed(terminal, format!("{event_type}: {e}")))
    }
}

fn malformed(terminal: bool, reason: impl Into<String>) -> StreamError {
    StreamError::MalformedFrame {
        reason: reason.into(),
        terminal,
    }
}

fn frame_names_terminal(frame: &str) -> bool {
    TERMINAL_TAGS.iter().any(|tag| frame.contains(tag))
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

#[derive(Deserialize)]
struct ResponseFrame {
    #[serde(default)]
    response: ResponseMeta,
}

#[derive(Deserialize)]
struct ItemFrame {
    #[serde(default)]
    output_index: Option<u32>,
    item: Value,
}

impl ItemFrame {
    fn split(self) -> Result<(Option<u32>, WireItem, Value), serde_json::Error> {
        let item: WireItem = serde_json::from_value(self.item.clone())?;
        Ok((self.output_index, item, self.item))
    }
}

#[derive(Deserialize)]
struct PartFrame {
    item_id: String,
    #[serde(default)]
    content_index: Option<u32>,
    #[serde(default)]
    summary_index: Option<u32>,
    #[serde(default)]
    part: Option<Value>,
}

#[derive(Deserialize)]
struct TextFrame {
    item_id: String,
    #[serde(default)]
    content_index: Option<u32>,
    #[serde(default)]
    summary_index: Option<u32>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct AnnotationFrame {
    item_id: String,
    #[serde(default)]
    content_index: u32,
    annotation: Value,
}

#[derive(Deserialize)]
struct ArgumentsFrame {
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    requires_approval: Option<bool>,
}

impl ArgumentsFrame {
    fn target(&mut self) -> Result<String, serde_json::Error> {
        self.item_id
            .take()
            .or_else(|| self.call_id.take())
            .ok_or_else(|| serde_json::Error::missing_field("item_id"))
    }
}

#[derive(Deserialize)]
struct ImageFrame {
    item_id: String,
    #[serde(default)]
    partial_image_index: u32,
    partial_image_b64: String,
}

#[derive(Deserialize)]
struct ItemRefFrame {
    item_id: String,
}

#[derive(Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

fn decode_tagged(
    event_type: &str,
    sequence_number: u64,
    value: Value,
) -> Result<StreamEvent, serde_json::Error> {
    let event = match event_type {
        "response.created" | "response.queued" | "response.in_progress" => {
            let frame: ResponseFrame = parse(value)?;
            StreamEvent::ResponseOpened {
                sequence_number,
                response: frame.response,
            }
        }
        "response.output_item.added" => {
            let (output_index, item, raw) = parse::<ItemFrame>(value)?.split()?;
            StreamEvent::OutputItemAdded {
                sequence_number,
                output_index,
                item,
                raw,
            }
        }
        "response.output_item.done" => {
            let (output_index, item, raw) = parse::<ItemFrame>(value)?.split()?;
            StreamEvent::OutputItemDone {
                sequence_number,
                output_index,
                item,
                raw,
            }
        }
        "response.content_part.added" | "response.reasoning_summary_part.added" => {
            let frame: PartFrame = parse(value)?;
            StreamEvent::ContentPartAdded {
                sequence_number,
                item_id: frame.item_id,
                content_index: frame.content_index.or(frame.summary_index).unwrap_or(0),
                part: frame.part,
            }
        }
        "response.content_part.done" | "response.reasoning_summary_part.done" => {
            let frame: PartFrame = parse(value)?;
            StreamEvent::ContentPartDone {
                sequence_number,
                item_id: frame.item_id,
                content_index: frame.content_index.or(frame.summary_index).unwrap_or(0),
                part: frame.part,
            }
        }
        "response.output_text.delta"
        | "response.refusal.delta"
        | "response.reasoning_summary_text.delta"
        | "response.reasoning_text.delta" => {
            let frame: TextFrame = parse(value)?;
            StreamEvent::TextDelta {
                sequence_number,
                item_id: frame.item_id,
                content_index: frame.content_index.or(frame.summary_index).unwrap_or(0),
                channel: text_channel(event_type),
                delta: frame
                    .delta
                    .ok_or_else(|| serde_json::Error::missing_field("delta"))?,
            }
        }
        "response.output_text.done"
        | "response.refusal.done"
        | "response.reasoning_summary_text.done"
        | "response.reasoning_text.done" => {
            let frame: TextFrame = parse(value)?;
            StreamEvent::TextDone {
                sequence_number,
                item_id: frame.item_id,
                content_index: frame.content_index.or(frame.summary_index).unwrap_or(0),
                channel: text_channel(event_type),
                text: frame.text.or(frame.refusal),
            }
        }
        "response.output_text.annotation.added" => {
            let frame: AnnotationFrame = parse(value)?;
            StreamEvent::AnnotationAdded {
                sequence_number,
                item_id: frame.item_id,
                content_index: frame.content_index,
                annotation: frame.annotation,
            }
        }
        "response.function_call_arguments.delta"
        | "response.custom_tool_call_input.delta"
        | "response.mcp_call_arguments.delta"
        | "response.mcp_call.arguments.delta"
        | "response.code_interpreter_call_code.delta"
        | "response.code_interpreter_call.code_delta" => {
            let mut frame: ArgumentsFrame = parse(value)?;
            StreamEvent::ArgumentsDelta {
                sequence_number,
                item_id: frame.target()?,
                kind: arguments_kind(event_type),
                delta: frame
                    .delta
                    .ok_or_else(|| serde_json::Error::missing_field("delta"))?,
            }
        }
        "response.function_call_arguments.done"
        | "response.custom_tool_call_input.done"
        | "response.mcp_call_arguments.done"
        | "response.mcp_call.arguments.done"
        | "response.code_interpreter_call_code.done"
        | "response.code_interpreter_call.code_done" => {
            let mut frame: ArgumentsFrame = parse(value)?;
            let item_id = frame.target()?;
            StreamEvent::ArgumentsDone {
                sequence_number,
                item_id,
                kind: arguments_kind(event_type),
                arguments: frame.arguments.or(frame.code).or(frame.input),
                requires_approval: frame.requires_approval.unwrap_or(false),
            }
        }
        "response.image_generation_call.partial_image" => {
            let frame: ImageFrame = parse(value)?;
            StreamEvent::ImagePartial {
                sequence_number,
                item_id: frame.item_id,
                partial_image_index: frame.partial_image_index,
                partial_image_b64: frame.partial_image_b64,
            }
        }
        "response.completed" | "response.done" => {
            let frame: ResponseFrame = parse(value)?;
            StreamEvent::ResponseCompleted {
                sequence_number,
                response: frame.response,
            }
        }
        "response.incomplete" => {
            let frame: ResponseFrame = parse(value)?;
            StreamEvent::ResponseIncomplete {
                sequence_number,
                response: frame.response,
            }
        }
        "response.failed" | "response.cancelled" => {
            let frame: ResponseFrame = parse(value)?;
            StreamEvent::ResponseFailed {
                sequence_number,
                response: frame.response,
            }
        }
        "error" | "response.error" => {
            let frame: ErrorFrame = parse(value)?;
            let nested = frame.error.unwrap_or_default();
            StreamEvent::Error {
                sequence_number,
                error: WireError {
                    code: frame.code.or(nested.code),
                    message: frame.message.or(nested.message),
                    error_type: nested.error_type,
                },
            }
        }
        other => match tool_progress(other) {
            Some((kind, phase)) => {
                let frame: ItemRefFrame = parse(value)?;
                StreamEvent::ToolProgress {
                    sequence_number,
                    item_id: frame.item_id,
                    kind,
                    phase,
                }
            }
            None => StreamEvent::Unrecognized {
                sequence_number,
                event_type: other.to_string(),
                raw: value,
            },
        },
    };
    Ok(event)
}

fn text_channel(event_type: &str) -> TextChannel {
    if event_type.starts_with("response.refusal") {
        TextChannel::Refusal
    } else if event_type.starts_with("response.reasoning_summary") {
        TextChannel::ReasoningSummary
    } else if event_type.starts_with("response.reasoning_text") {
        TextChannel::Reasoning
    } else {
        TextChannel::OutputText
    }
}

fn arguments_kind(event_type: &str) -> ToolKind {
    if event_type.starts_with("response.mcp_call") {
        ToolKind::Mcp
    } else if event_type.starts_with("response.code_interpreter_call") {
        ToolKind::CodeInterpreter
    } else {
        ToolKind::Function
    }
}

/// Maps `response.<subject>.<phase>` status tags of hosted tools.
fn tool_progress(event_type: &str) -> Option<(ToolKind, ToolPhase)> {
    let (subject, phase) = event_type.strip_prefix("response.")?.rsplit_once('.')?;
    let kind = match subject {
        "code_interpreter_call" => ToolKind::CodeInterpreter,
        "image_generation_call" => ToolKind::ImageGeneration,
        "web_search_call" => ToolKind::WebSearch,
        "file_search_call" => ToolKind::FileSearch,
        "mcp_call" | "mcp_list_tools" => ToolKind::Mcp,
        _ => return None,
    };
    let phase = match phase {
        "in_progress" => ToolPhase::InProgress,
        "searching" => ToolPhase::Searching,
        "interpreting" => ToolPhase::Interpreting,
        "generating" => ToolPhase::Generating,
        "completed" => ToolPhase::Completed,
        "failed" => ToolPhase::Failed,
        _ => return None,
    };
    Some((kind, phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(frame: serde_json::Value) -> Result<StreamEvent, StreamError> {
        EventDecoder::new().decode(&frame.to_string())
    }

    #[test]
    fn framer_joins_data_lines_and_skips_comments() {
        let mut framer = SseFramer::new();
        let frames = framer.push(
            b": keep-alive\nevent: response.output_text.delta\ndata: {\"a\":\ndata: 1}\n\n",
        );
        assert_eq!(frames, vec!["{\"a\":\n1}".to_string()]);
    }

    #[test]
    fn framer_handles_chunks_split_mid_character() {
        let mut framer = SseFramer::new();
        let payload = "data: {\"delta\":\"héllo\"}\r\n\r\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(framer.push(&payload[..split]).is_empty());
        let frames = framer.push(&payload[split..]);
        assert_eq!(frames, vec!["{\"delta\":\"héllo\"}".to_string()]);
    }

    #[test]
    fn framer_stops_at_done_sentinel() {
        let mut framer = SseFramer::new();
        let frames = framer.push(b"data: {}\n\ndata: [DONE]\n\ndata: {\"late\":true}\n\n");
        assert_eq!(frames, vec!["{}".to_string()]);
        assert!(framer.is_done());
        assert!(framer.push(b"data: {}\n\n").is_empty());
    }

    #[test]
    fn framer_finish_flushes_unterminated_event() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(framer.finish(), Some("{\"x\":1}".to_string()));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn decodes_text_delta() {
        let event = decode(serde_json::json!({
            "type": "response.output_text.delta",
            "sequence_number": 7,
            "item_id": "msg_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "Hel"
        }))
        .unwrap();
        match event {
            StreamEvent::TextDelta {
                sequence_number,
                item_id,
                content_index,
                channel,
                delta,
            } => {
                assert_eq!(sequence_number, 7);
                assert_eq!(item_id, "msg_1");
                assert_eq!(content_index, 0);
                assert_eq!(channel, TextChannel::OutputText);
                assert_eq!(delta, "Hel");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reasoning_summary_uses_summary_index() {
        let event = decode(serde_json::json!({
            "type": "response.reasoning_summary_text.delta",
            "sequence_number": 3,
            "item_id": "rs_1",
            "summary_index": 1,
            "delta": "thinking"
        }))
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::TextDelta {
                content_index: 1,
                channel: TextChannel::ReasoningSummary,
                ..
            }
        ));
    }

    #[test]
    fn unknown_type_is_unrecognized_not_error() {
        let event = decode(serde_json::json!({
            "type": "response.hologram.delta",
            "sequence_number": 2,
            "payload": {"x": 1}
        }))
        .unwrap();
        match event {
            StreamEvent::Unrecognized { event_type, raw, .. } => {
                assert_eq!(event_type, "response.hologram.delta");
                assert_eq!(raw["payload"]["x"], 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_soft_malformed() {
        let err = EventDecoder::new()
            .decode("{\"type\":\"response.output_text.delta\",")
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame { terminal: false, .. }));
    }

    #[test]
    fn invalid_completion_frame_is_terminal() {
        let err = EventDecoder::new()
            .decode("{\"type\":\"response.completed\",\"sequence_number\":")
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame { terminal: true, .. }));
    }

    #[test]
    fn missing_sequence_number_is_malformed() {
        let err = decode(serde_json::json!({
            "type": "response.output_text.delta",
            "item_id": "msg_1",
            "content_index": 0,
            "delta": "x"
        }))
        .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame { .. }));
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        let err = decode(serde_json::json!({
            "type": "response.output_text.delta",
            "sequence_number": 1,
            "content_index": 0,
            "delta": "x"
        }))
        .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame { terminal: false, .. }));
    }

    #[test]
    fn mcp_arguments_done_carries_approval_flag() {
        let event = decode(serde_json::json!({
            "type": "response.mcp_call_arguments.done",
            "sequence_number": 9,
            "item_id": "mcp_2",
            "arguments": "{\"q\":1}",
            "requires_approval": true
        }))
        .unwrap();
        match event {
            StreamEvent::ArgumentsDone {
                item_id,
                kind,
                arguments,
                requires_approval,
                ..
            } => {
                assert_eq!(item_id, "mcp_2");
                assert_eq!(kind, ToolKind::Mcp);
                assert_eq!(arguments.as_deref(), Some("{\"q\":1}"));
                assert!(requires_approval);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn function_arguments_fall_back_to_call_id() {
        let event = decode(serde_json::json!({
            "type": "response.function_call_arguments.delta",
            "sequence_number": 4,
            "call_id": "call_9",
            "delta": "{\"a\""
        }))
        .unwrap();
        assert_eq!(event.item_id(), Some("call_9"));
    }

    #[test]
    fn hosted_tool_status_maps_to_progress() {
        let event = decode(serde_json::json!({
            "type": "response.web_search_call.searching",
            "sequence_number": 5,
            "item_id": "ws_1",
            "output_index": 1
        }))
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::ToolProgress {
                kind: ToolKind::WebSearch,
                phase: ToolPhase::Searching,
                ..
            }
        ));
    }

    #[test]
    fn error_event_reads_nested_error_block() {
        let event = decode(serde_json::json!({
            "type": "error",
            "sequence_number": 11,
            "error": {"code": "server_error", "message": "boom", "type": "server_error"}
        }))
        .unwrap();
        match event {
            StreamEvent::Error { error, .. } => {
                assert_eq!(error.code.as_deref(), Some("server_error"));
                assert_eq!(error.message.as_deref(), Some("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn output_item_keeps_raw_payload() {
        let event = decode(serde_json::json!({
            "type": "response.output_item.added",
            "sequence_number": 1,
            "output_index": 0,
            "item": {"id": "cu_1", "type": "computer_call", "status": "in_progress",
                     "pending_safety_checks": [{"id": "sc_1", "code": "malicious_instructions"}],
                     "action": {"type": "click", "x": 1, "y": 2}}
        }))
        .unwrap();
        match event {
            StreamEvent::OutputItemAdded { item, raw, .. } => {
                assert_eq!(item.item_type, "computer_call");
                assert_eq!(item.safety_checks().len(), 1);
                assert_eq!(raw["action"]["type"], "click");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
