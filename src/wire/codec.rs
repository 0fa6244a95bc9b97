//! The `WireCodec` capability set plus the streaming-delta reassembly helper.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{NekobotError, Result};
use crate::wire::{UnifiedRequest, UnifiedResponse};

/// A single piece of a streaming response. `None` signals end-of-stream.
#[derive(Debug, Clone)]
pub enum DeltaEvent {
    /// Plain assistant text fragment.
    TextDelta(String),
    /// A fragment of a tool call's arguments JSON, tagged with the index
    /// of the tool call it belongs to so the consumer can accumulate it.
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    /// Extended-thinking text fragment, when the vendor streams one.
    ThinkingDelta(String),
    /// Terminal event carrying the finish reason and usage, if known.
    Done {
        finish_reason: crate::wire::FinishReason,
        usage: Option<crate::wire::TokenUsage>,
    },
}

/// What a [`WireCodec::decode_stream_chunk`] call returns for one
/// raw chunk of bytes off the wire.
pub type StreamEvent = Option<DeltaEvent>;

/// Bidirectional translator between the unified schema and one vendor's
/// wire format, for both one-shot and streaming interactions.
#[async_trait]
pub trait WireCodec: Send + Sync {
    /// Vendor kind this codec implements (`"openai"`, `"anthropic"`, `"gemini"`).
    fn kind(&self) -> &'static str;

    /// Encode a unified request into the vendor's JSON body.
    ///
    /// Must preserve message ordering, tool-call IDs, tool-result
    /// correspondence, and system-prompt placement per vendor convention.
    fn encode_request(&self, request: &UnifiedRequest) -> Result<Value>;

    /// Decode a complete (non-streaming) vendor response body.
    fn decode_response(&self, body: &[u8]) -> Result<UnifiedResponse>;

    /// Decode one raw chunk from a streaming response into zero-or-more
    /// delta events. Returns `None` once all events from this chunk have
    /// been consumed by the caller via repeated calls, or when the chunk
    /// carries no meaningful event (e.g. an SSE comment/keepalive line).
    fn decode_stream_chunk(&self, chunk: &[u8]) -> Result<StreamEvent>;
}

/// Accumulates streamed tool-call argument fragments per tool-call index:
/// each vendor streams a tool call's arguments as JSON fragments, and this
/// buffers them per index, parsing only once the block-end event fires.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: HashMap<usize, PartialToolCall>,
    order: Vec<usize>,
}

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments_buf: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: &str,
    ) {
        if !self.slots.contains_key(&index) {
            self.order.push(index);
        }
        let slot = self.slots.entry(index).or_default();
        if id.is_some() {
            slot.id = id;
        }
        if name.is_some() {
            slot.name = name;
        }
        slot.arguments_buf.push_str(arguments_fragment);
    }

    /// Finalize all accumulated tool calls, in the order their index was
    /// first seen. Calls with an empty/invalid arguments buffer fall back
    /// to an empty object, matching vendor behavior for no-arg tools.
    pub fn finish(self) -> Result<Vec<crate::wire::ToolCall>> {
        let mut out = Vec::with_capacity(self.order.len());
        for idx in self.order {
            let slot = self.slots.get(&idx).cloned().unwrap_or_default();
            let args_value: Value = if slot.arguments_buf.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&slot.arguments_buf).map_err(|e| {
                    NekobotError::Internal(format!(
                        "tool call {idx} arguments not valid JSON: {e}"
                    ))
                })?
            };
            let arguments = match args_value {
                Value::Object(map) => map.into_iter().collect(),
                other => {
                    let mut m = HashMap::new();
                    m.insert("value".to_string(), other);
                    m
                }
            };
            out.push(crate::wire::ToolCall {
                id: slot.id.unwrap_or_default(),
                name: slot.name.unwrap_or_default(),
                arguments,
            });
        }
        Ok(out)
    }
}
