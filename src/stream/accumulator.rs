//! Folds decoded events into the in-progress response.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::{ErrorDetail, StreamError};
use crate::types::event::{ResponseMeta, StreamEvent, ToolPhase, WireError, WireItem};
use crate::types::response::{
    ContentPart, FinalizedResponse, ItemStatus, ItemType, OutputItem, PartPayload, PartType,
};
use crate::types::tool::ToolInvocation;
use crate::types::usage::Usage;

/// What a single [`ResponseAccumulator::apply`] changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotDelta {
    /// Nothing visible changed (empty delta, repeated done event).
    Unchanged,
    /// Response-level metadata (id, model, usage).
    Response,
    Item {
        item_id: String,
    },
    Part {
        item_id: String,
        content_index: u32,
    },
    /// The response reached `response.completed` or `response.incomplete`.
    Completed {
        incomplete: bool,
    },
    Failed(ErrorDetail),
}

impl SnapshotDelta {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Frozen { incomplete: bool },
    Failed,
}

/// Owns the output items of one logical stream.
///
/// Items from every transport leg of a session land in the same
/// accumulator, in arrival order.
#[derive(Debug)]
pub struct ResponseAccumulator {
    response_id: Option<String>,
    model: Option<String>,
    items: Vec<OutputItem>,
    index: HashMap<String, usize>,
    done_items: HashSet<String>,
    /// Parts that received at least one delta.
    streamed: HashSet<(String, u32)>,
    usage: Usage,
    incomplete_reason: Option<String>,
    phase: Phase,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self {
            response_id: None,
            model: None,
            items: Vec::new(),
            index: HashMap::new(),
            done_items: HashSet::new(),
            streamed: HashSet::new(),
            usage: Usage::default(),
            incomplete_reason: None,
            phase: Phase::Open,
        }
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn items(&self) -> &[OutputItem] {
        &self.items
    }

    pub fn item(&self, item_id: &str) -> Option<&OutputItem> {
        self.index.get(item_id).map(|idx| &self.items[*idx])
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Accept events again after a leg froze the response. Items and usage
    /// carry over into the next leg.
    pub fn reopen(&mut self) {
        if matches!(self.phase, Phase::Frozen { .. }) {
            self.phase = Phase::Open;
            self.incomplete_reason = None;
        }
    }

    /// Mark one item failed. Returns `false` if it was unknown or already failed.
    pub fn mark_failed(&mut self, item_id: &str) -> bool {
        match self.item_mut(item_id) {
            Ok(item) if item.status != ItemStatus::Failed => {
                item.status = ItemStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Fold one event into the response.
    ///
    /// Errors are classified by [`StreamError::is_fatal`]; soft errors leave
    /// the accumulated state untouched.
    pub fn apply(&mut self, event: &StreamEvent) -> Result<SnapshotDelta, StreamError> {
        if self.phase != Phase::Open {
            return Err(StreamError::InvalidState(
                "response already reached a terminal event".into(),
            ));
        }
        match event {
            StreamEvent::ResponseOpened { response, .. } => {
                self.absorb_meta(response);
                Ok(SnapshotDelta::Response)
            }
            StreamEvent::OutputItemAdded {
                output_index,
                item,
                raw,
                ..
            } => self.add_item(*output_index, item, raw),
            StreamEvent::OutputItemDone {
                output_index,
                item,
                raw,
                ..
            } => self.finish_item(*output_index, item, raw),
            StreamEvent::ContentPartAdded {
                item_id,
                content_index,
                part,
                ..
            } => self.add_part(item_id, *content_index, part.as_ref()),
            StreamEvent::ContentPartDone {
                item_id,
                content_index,
                part,
                ..
            } => self.finish_part(item_id, *content_index, part.as_ref()),
            StreamEvent::TextDelta {
                item_id,
                content_index,
                delta,
                ..
            } => self.append_text(item_id, *content_index, delta),
            StreamEvent::TextDone {
                item_id,
                content_index,
                text,
                ..
            } => self.finish_text(item_id, *content_index, text.as_deref()),
            StreamEvent::AnnotationAdded {
                item_id,
                content_index,
                annotation,
                ..
            } => {
                let part = self.open_part_mut(item_id, *content_index)?;
                part.annotations.push(annotation.clone());
                Ok(SnapshotDelta::Part {
                    item_id: item_id.clone(),
                    content_index: *content_index,
                })
            }
            StreamEvent::ImagePartial {
                item_id,
                partial_image_index,
                partial_image_b64,
                ..
            } => self.replace_image(item_id, partial_image_b64, Some(*partial_image_index)),
            StreamEvent::ToolProgress { item_id, phase, .. } => {
                let item = self.item_mut(item_id)?;
                if *phase == ToolPhase::Failed {
                    item.status = ItemStatus::Failed;
                    return Ok(SnapshotDelta::Item {
                        item_id: item_id.clone(),
                    });
                }
                Ok(SnapshotDelta::Unchanged)
            }
            // Argument text is owned by the tool registry.
            StreamEvent::ArgumentsDelta { .. } | StreamEvent::ArgumentsDone { .. } => {
                Ok(SnapshotDelta::Unchanged)
            }
            StreamEvent::ResponseCompleted { response, .. } => Ok(self.freeze(response, false)),
            StreamEvent::ResponseIncomplete { response, .. } => Ok(self.freeze(response, true)),
            StreamEvent::ResponseFailed { response, .. } => {
                self.absorb_meta(response);
                let detail = error_detail(
                    response.error.as_ref(),
                    "response_failed",
                    "the response failed",
                );
                Ok(self.fail(detail))
            }
            StreamEvent::Error { error, .. } => {
                let detail =
                    error_detail(Some(error), "server_error", "the server reported an error");
                Ok(self.fail(detail))
            }
            StreamEvent::Unrecognized { event_type, .. } => {
                Err(StreamError::UnrecognizedEventType(event_type.clone()))
            }
        }
    }

    /// Build the finalized response once the stream has been frozen.
    pub fn finalize(&self, invocations: Vec<ToolInvocation>) -> Option<FinalizedResponse> {
        let Phase::Frozen { incomplete } = self.phase else {
            return None;
        };
        Some(FinalizedResponse {
            id: self.response_id.clone(),
            model: self.model.clone(),
            items: self.items.clone(),
            invocations,
            usage: self.usage.clone(),
            incomplete,
            incomplete_reason: self.incomplete_reason.clone(),
            completed_at: chrono::Utc::now(),
        })
    }

    fn absorb_meta(&mut self, response: &ResponseMeta) {
        if let Some(id) = &response.id {
            self.response_id = Some(id.clone());
        }
        if let Some(model) = &response.model {
            self.model = Some(model.clone());
        }
    }

    fn freeze(&mut self, response: &ResponseMeta, incomplete: bool) -> SnapshotDelta {
        self.absorb_meta(response);
        if let Some(usage) = &response.usage {
            self.usage.merge(&Usage::from(usage));
        }
        if incomplete {
            self.incomplete_reason = response
                .incomplete_details
                .as_ref()
                .and_then(|details| details.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        self.phase = Phase::Frozen { incomplete };
        SnapshotDelta::Completed { incomplete }
    }

    fn fail(&mut self, detail: ErrorDetail) -> SnapshotDelta {
        self.phase = Phase::Failed;
        SnapshotDelta::Failed(detail)
    }

    fn add_item(
        &mut self,
        output_index: Option<u32>,
        item: &WireItem,
        raw: &Value,
    ) -> Result<SnapshotDelta, StreamError> {
        if self.index.contains_key(&item.id) {
            return Err(StreamError::DuplicateItem(item.id.clone()));
        }
        self.insert_item(output_index, item, raw);
        Ok(SnapshotDelta::Item {
            item_id: item.id.clone(),
        })
    }

    fn insert_item(&mut self, output_index: Option<u32>, item: &WireItem, raw: &Value) {
        let status = match item.status.as_deref() {
            Some("failed") => ItemStatus::Failed,
            _ => ItemStatus::InProgress,
        };
        self.index.insert(item.id.clone(), self.items.len());
        self.items.push(OutputItem {
            id: item.id.clone(),
            output_index,
            item_type: ItemType::from(item.item_type.as_str()),
            status,
            name: item.name.clone(),
            call_id: item.call_id.clone(),
            content: Vec::new(),
            raw: raw.clone(),
        });
    }

    fn finish_item(
        &mut self,
        output_index: Option<u32>,
        item: &WireItem,
        raw: &Value,
    ) -> Result<SnapshotDelta, StreamError> {
        if !self.index.contains_key(&item.id) {
            tracing::debug!(item_id = %item.id, "output item finished without being announced");
            self.insert_item(output_index, item, raw);
        }
        if !self.done_items.insert(item.id.clone()) {
            return Ok(SnapshotDelta::Unchanged);
        }
        let idx = *self
            .index
            .get(&item.id)
            .ok_or_else(|| unknown(&item.id, None))?;
        let target = &mut self.items[idx];
        target.status = ItemStatus::from_wire(item.status.as_deref());
        target.raw = raw.clone();
        if item.name.is_some() {
            target.name = item.name.clone();
        }
        if item.call_id.is_some() {
            target.call_id = item.call_id.clone();
        }
        if let Some(content) = &item.content {
            fill_from_final_content(target, content, &self.streamed);
        }
        attach_tool_artifacts(target, item);
        for part in &mut target.content {
            part.done = true;
        }
        Ok(SnapshotDelta::Item {
            item_id: item.id.clone(),
        })
    }

    fn add_part(
        &mut self,
        item_id: &str,
        content_index: u32,
        part: Option<&Value>,
    ) -> Result<SnapshotDelta, StreamError> {
        let item_done = self.done_items.contains(item_id);
        let item = self.item_mut(item_id)?;
        if item_done {
            return Err(late(item_id, Some(content_index)));
        }
        let next = item.content.len() as u32;
        if content_index < next {
            return match item.part(content_index) {
                Some(existing) if existing.done => Err(late(item_id, Some(content_index))),
                _ => Ok(SnapshotDelta::Unchanged),
            };
        }
        if content_index > next {
            return Err(unknown(item_id, Some(content_index)));
        }
        item.content.push(part_from_wire(content_index, part));
        Ok(SnapshotDelta::Part {
            item_id: item_id.to_string(),
            content_index,
        })
    }

    fn finish_part(
        &mut self,
        item_id: &str,
        content_index: u32,
        part: Option<&Value>,
    ) -> Result<SnapshotDelta, StreamError> {
        let streamed = self.streamed.contains(&(item_id.to_string(), content_index));
        let target = self.part_mut(item_id, content_index)?;
        if target.done {
            return Ok(SnapshotDelta::Unchanged);
        }
        if let Some(part) = part {
            if !streamed {
                if let (PartPayload::Text { text }, Some(final_text)) =
                    (&mut target.payload, wire_text(part))
                {
                    *text = final_text.to_string();
                }
            }
            if target.annotations.is_empty() {
                if let Some(Value::Array(annotations)) = part.get("annotations") {
                    target.annotations = annotations.clone();
                }
            }
        }
        target.done = true;
        Ok(SnapshotDelta::Part {
            item_id: item_id.to_string(),
            content_index,
        })
    }

    fn append_text(
        &mut self,
        item_id: &str,
        content_index: u32,
        delta: &str,
    ) -> Result<SnapshotDelta, StreamError> {
        let part = self.open_part_mut(item_id, content_index)?;
        if delta.is_empty() {
            return Ok(SnapshotDelta::Unchanged);
        }
        match &mut part.payload {
            PartPayload::Text { text } => text.push_str(delta),
            _ => return Err(unknown(item_id, Some(content_index))),
        }
        self.streamed.insert((item_id.to_string(), content_index));
        Ok(SnapshotDelta::Part {
            item_id: item_id.to_string(),
            content_index,
        })
    }

    fn finish_text(
        &mut self,
        item_id: &str,
        content_index: u32,
        final_text: Option<&str>,
    ) -> Result<SnapshotDelta, StreamError> {
        let streamed = self.streamed.contains(&(item_id.to_string(), content_index));
        let part = self.part_mut(item_id, content_index)?;
        if part.done {
            return Ok(SnapshotDelta::Unchanged);
        }
        if let (false, Some(final_text), PartPayload::Text { text }) =
            (streamed, final_text, &mut part.payload)
        {
            *text = final_text.to_string();
        }
        part.done = true;
        Ok(SnapshotDelta::Part {
            item_id: item_id.to_string(),
            content_index,
        })
    }

    /// Partial images supersede each other rather than concatenating.
    fn replace_image(
        &mut self,
        item_id: &str,
        base64: &str,
        partial_index: Option<u32>,
    ) -> Result<SnapshotDelta, StreamError> {
        if self.done_items.contains(item_id) {
            return Err(late(item_id, None));
        }
        let item = self.item_mut(item_id)?;
        set_image(item, base64, partial_index);
        Ok(SnapshotDelta::Part {
            item_id: item_id.to_string(),
            content_index: 0,
        })
    }

    fn item_mut(&mut self, item_id: &str) -> Result<&mut OutputItem, StreamError> {
        let idx = *self
            .index
            .get(item_id)
            .ok_or_else(|| unknown(item_id, None))?;
        Ok(&mut self.items[idx])
    }

    fn part_mut(
        &mut self,
        item_id: &str,
        content_index: u32,
    ) -> Result<&mut ContentPart, StreamError> {
        self.item_mut(item_id)?
            .content
            .iter_mut()
            .find(|p| p.index == content_index)
            .ok_or_else(|| unknown(item_id, Some(content_index)))
    }

    /// A part that may still receive deltas.
    fn open_part_mut(
        &mut self,
        item_id: &str,
        content_index: u32,
    ) -> Result<&mut ContentPart, StreamError> {
        if self.done_items.contains(item_id) {
            return Err(late(item_id, Some(content_index)));
        }
        let part = self.part_mut(item_id, content_index)?;
        if part.done {
            return Err(late(item_id, Some(content_index)));
        }
        Ok(part)
    }
}

fn unknown(item_id: &str, content_index: Option<u32>) -> StreamError {
    StreamError::UnknownTarget {
        item_id: item_id.to_string(),
        content_index,
    }
}

fn late(item_id: &str, content_index: Option<u32>) -> StreamError {
    StreamError::LateDelta {
        item_id: item_id.to_string(),
        content_index,
    }
}

fn error_detail(error: Option<&WireError>, code: &str, message: &str) -> ErrorDetail {
    let code = error
        .and_then(|e| e.code.clone().or_else(|| e.error_type.clone()))
        .unwrap_or_else(|| code.to_string());
    let message = error
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| message.to_string());
    ErrorDetail::new(code, message)
}

fn wire_text(part: &Value) -> Option<&str> {
    part.get("text")
        .or_else(|| part.get("refusal"))
        .and_then(Value::as_str)
}

fn part_from_wire(index: u32, part: Option<&Value>) -> ContentPart {
    let part_type = PartType::from_wire(part.and_then(|p| p.get("type")).and_then(Value::as_str));
    match part_type {
        PartType::Text | PartType::Refusal => {
            ContentPart::text(index, part_type, part.and_then(wire_text).unwrap_or_default())
        }
        PartType::Image => ContentPart::image(
            index,
            part.and_then(|p| p.get("image_base64").or_else(|| p.get("b64_json")))
                .and_then(Value::as_str)
                .unwrap_or_default(),
            None,
        ),
        PartType::ToolArtifact => {
            ContentPart::artifact(index, part.cloned().unwrap_or(Value::Null))
        }
    }
}

/// Fill parts from the item's final `content` when the stream never
/// delivered them as deltas.
fn fill_from_final_content(
    item: &mut OutputItem,
    content: &[Value],
    streamed: &HashSet<(String, u32)>,
) {
    for (idx, value) in content.iter().enumerate() {
        let idx = idx as u32;
        match item.content.iter().position(|p| p.index == idx) {
            Some(pos) => {
                if streamed.contains(&(item.id.clone(), idx)) {
                    continue;
                }
                if let (PartPayload::Text { text }, Some(final_text)) =
                    (&mut item.content[pos].payload, wire_text(value))
                {
                    if text.is_empty() {
                        *text = final_text.to_string();
                    }
                }
            }
            None if idx as usize == item.content.len() => {
                item.content.push(part_from_wire(idx, Some(value)));
            }
            None => {}
        }
    }
}

/// Expose tool results as content parts of the finished item.
fn attach_tool_artifacts(item: &mut OutputItem, wire: &WireItem) {
    match item.item_type {
        ItemType::ImageGenerationCall => {
            if let Some(Value::String(result)) = &wire.result {
                set_image(item, result, None);
            }
        }
        ItemType::CodeInterpreterCall => {
            for output in wire.outputs.iter().flatten() {
                push_artifact(item, output.clone());
            }
        }
        ItemType::WebSearchCall => {
            if let Some(action) = &wire.action {
                push_artifact(item, action.clone());
            }
        }
        ItemType::McpCall | ItemType::FunctionCall | ItemType::CustomToolCall => {
            if let Some(output) = wire.output.as_ref().filter(|o| !o.is_null()) {
                push_artifact(item, output.clone());
            }
        }
        _ => {}
    }
}

fn push_artifact(item: &mut OutputItem, value: Value) {
    let index = item.content.len() as u32;
    item.content.push(ContentPart::artifact(index, value));
}

fn set_image(item: &mut OutputItem, base64: &str, partial_index: Option<u32>) {
    match item.content.iter_mut().find(|p| p.part_type == PartType::Image) {
        Some(part) => {
            part.payload = PartPayload::Image {
                base64: base64.to_string(),
                partial_index,
            };
        }
        None => {
            let index = item.content.len() as u32;
            item.content.push(ContentPart::image(index, base64, partial_index));
        }
    }
}
