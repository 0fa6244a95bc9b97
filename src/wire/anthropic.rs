//! Anthropic-shape codec: `POST {base}/messages`, `x-api-key` +
//! `anthropic-version: 2023-06-01`, named SSE events, tool results modeled
//! as `user` messages containing a `tool_result` content block.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{NekobotError, Result};
use crate::wire::codec::{DeltaEvent, StreamEvent, WireCodec};
use crate::wire::{FinishReason, Message, TokenUsage, ToolCall, ToolDef, UnifiedRequest, UnifiedResponse};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicCodec;

impl AnthropicCodec {
    pub fn new() -> Self {
        Self
    }

    fn encode_tool_def(def: &ToolDef) -> Value {
        json!({
            "name": def.name,
            "description": def.description,
            "input_schema": def.parameters,
        })
    }

    fn map_stop_reason(raw: &str) -> FinishReason {
        match raw {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "tool_use" => FinishReason::ToolCalls,
            "max_tokens" => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

impl Default for AnthropicCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireCodec for AnthropicCodec {
    fn kind(&self) -> &'static str {
        "anthropic"
    }

    fn encode_request(&self, request: &UnifiedRequest) -> Result<Value> {
        // System messages merge into a top-level `system` string field.
        let system: String = request
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::System { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg {
                Message::System { .. } => {}
                Message::User { content } => {
                    messages.push(json!({"role": "user", "content": content}));
                }
                Message::Assistant { content, tool_calls } => {
                    let mut blocks = Vec::new();
                    if !content.is_empty() {
                        blocks.push(json!({"type": "text", "text": content}));
                    }
                    for tc in tool_calls {
                        let input: Value = tc.arguments.clone().into_iter().collect();
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": input,
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
                Message::Tool { content, tool_call_id } => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": content,
                        }]
                    }));
                }
            }
        }

        // max_tokens is required by the vendor; default to 4096 if the
        // caller's request left the field at its zero value.
        let max_tokens = if request.max_tokens == 0 { 4096 } else { request.max_tokens };

        let mut body = json!({
            "model": request.model,
            "max_tokens": max_tokens,
            "messages": messages,
            "stream": request.stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(Self::encode_tool_def).collect();
            body["tools"] = json!(tools);
        }

        if request.extended_thinking() {
            // Thinking-enabled requests must omit temperature/top_p per vendor contract.
            let budget = request.thinking_budget().unwrap_or(1024);
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        } else {
            body["temperature"] = json!(request.temperature);
        }

        Ok(body)
    }

    fn decode_response(&self, body: &[u8]) -> Result<UnifiedResponse> {
        let data: Value = serde_json::from_slice(body)
            .map_err(|e| NekobotError::BadResponse(format!("invalid JSON: {e}")))?;

        let mut content = String::new();
        let mut thinking: Option<String> = None;
        let mut tool_calls = Vec::new();

        if let Some(blocks) = data.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            if !content.is_empty() {
                                content.push('\n');
                            }
                            content.push_str(t);
                        }
                    }
                    Some("thinking") => {
                        if let Some(t) = block.get("thinking").and_then(Value::as_str) {
                            thinking.get_or_insert_with(String::new).push_str(t);
                        }
                    }
                    Some("tool_use") => {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        let arguments = match block.get("input").cloned().unwrap_or(json!({})) {
                            Value::Object(m) => m.into_iter().collect(),
                            _ => Default::default(),
                        };
                        tool_calls.push(ToolCall { id, name, arguments });
                    }
                    _ => {}
                }
            }
        }

        let finish_reason = data
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(Self::map_stop_reason)
            .unwrap_or(FinishReason::Stop);

        let usage = data
            .get("usage")
            .map(|u| {
                let prompt = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                TokenUsage {
                    prompt,
                    completion,
                    total: prompt + completion,
                }
            })
            .unwrap_or_default();

        Ok(UnifiedResponse {
            id: data.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: data.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
            content,
            thinking,
            tool_calls,
            finish_reason,
            usage,
        })
    }

    fn decode_stream_chunk(&self, chunk: &[u8]) -> Result<StreamEvent> {
        let text = std::str::from_utf8(chunk)
            .map_err(|e| NekobotError::BadResponse(format!("non-utf8 SSE chunk: {e}")))?;

        let mut event_name = None;
        let mut data_line = None;
        for line in text.lines() {
            if let Some(e) = line.strip_prefix("event: ") {
                event_name = Some(e.trim().to_string());
            } else if let Some(d) = line.strip_prefix("data: ") {
                data_line = Some(d.trim().to_string());
            }
        }
        let (event_name, data_line) = match (event_name, data_line) {
            (Some(e), Some(d)) => (e, d),
            _ => return Ok(None),
        };

        let json: Value = serde_json::from_str(&data_line)
            .map_err(|e| NekobotError::BadResponse(format!("invalid SSE JSON: {e}")))?;

        match event_name.as_str() {
            "content_block_delta" => {
                let delta = json.get("delta").cloned().unwrap_or(json!({}));
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let t = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        Ok(Some(DeltaEvent::TextDelta(t.to_string())))
                    }
                    Some("thinking_delta") => {
                        let t = delta.get("thinking").and_then(Value::as_str).unwrap_or_default();
                        Ok(Some(DeltaEvent::ThinkingDelta(t.to_string())))
                    }
                    Some("input_json_delta") => {
                        let index = json.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                        let fragment = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                        Ok(Some(DeltaEvent::ToolCallFragment {
                            index,
                            id: None,
                            name: None,
                            arguments_fragment: fragment.to_string(),
                        }))
                    }
                    _ => Ok(None),
                }
            }
            "content_block_start" => {
                let block = json.get("content_block").cloned().unwrap_or(json!({}));
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let index = json.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                    let id = block.get("id").and_then(Value::as_str).map(str::to_string);
                    let name = block.get("name").and_then(Value::as_str).map(str::to_string);
                    Ok(Some(DeltaEvent::ToolCallFragment {
                        index,
                        id,
                        name,
                        arguments_fragment: String::new(),
                    }))
                } else {
                    Ok(None)
                }
            }
            "message_delta" => {
                let stop_reason = json
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str);
                let usage = json.get("usage").map(|u| {
                    let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                    TokenUsage {
                        prompt: 0,
                        completion,
                        total: completion,
                    }
                });
                match stop_reason {
                    Some(sr) => Ok(Some(DeltaEvent::Done {
                        finish_reason: Self::map_stop_reason(sr),
                        usage,
                    })),
                    None => Ok(None),
                }
            }
            "message_stop" => Ok(Some(DeltaEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: None,
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_merges_system_and_requires_max_tokens() {
        let codec = AnthropicCodec::new();
        let req = UnifiedRequest::new(
            "claude-3-haiku",
            vec![Message::system("be nice"), Message::user("hi")],
        );
        let body = codec.encode_request(&req).unwrap();
        assert_eq!(body["system"], "be nice");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn encode_request_thinking_omits_temperature() {
        let codec = AnthropicCodec::new();
        let mut req = UnifiedRequest::new("claude-3-opus", vec![Message::user("hi")]);
        req.extra.insert("extended_thinking".into(), json!(true));
        req.extra.insert("thinking_budget".into(), json!(2048));
        let body = codec.encode_request(&req).unwrap();
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn decode_response_extracts_tool_use_block() {
        let codec = AnthropicCodec::new();
        let body = json!({
            "id": "msg1",
            "model": "claude-3-haiku",
            "content": [
                {"type": "tool_use", "id": "c1", "name": "read_file", "input": {"path": "README.md"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let resp = codec.decode_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.usage.total, 15);
    }
}
