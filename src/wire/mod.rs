//! Unified request/response schema and the per-vendor codecs
//! that translate to/from it.

pub mod anthropic;
pub mod codec;
pub mod gemini;
pub mod openai;

pub use codec::{DeltaEvent, StreamEvent, ToolCallAccumulator, WireCodec};

use serde_json::Value;
use std::collections::HashMap;

/// A single tool definition advertised to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A provider-issued tool invocation request. `id` is opaque and is echoed
/// back in the matching `tool` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, Value>,
}

/// Tagged-variant message. Deliberately a sum type, not an
/// inheritance hierarchy, so the sanitizer's pattern match is exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    pub fn is_assistant_with_tool_calls(&self) -> bool {
        matches!(self, Message::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }
}

/// Normalized termination cause for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Request consumed by exactly one adaptor call.
#[derive(Debug, Clone)]
pub struct UnifiedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub extra: HashMap<String, Value>,
}

impl UnifiedRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 1.0,
            stream: false,
            extra: HashMap::new(),
        }
    }

    pub fn extended_thinking(&self) -> bool {
        self.extra
            .get("extended_thinking")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn thinking_budget(&self) -> Option<u64> {
        self.extra.get("thinking_budget").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct UnifiedResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl UnifiedResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
