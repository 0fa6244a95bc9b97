//! OpenAI-shape codec: `POST {base}/chat/completions`, bearer auth, SSE
//! framed `data: {json}\n\n`, terminator `data: [DONE]`.
//!
//! Also used (via the `generic` adaptor kind) for any OpenAI-compatible
//! backend: OpenRouter, Groq, DeepSeek, local Ollama, etc.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{NekobotError, Result};
use crate::wire::codec::{DeltaEvent, StreamEvent, WireCodec};
use crate::wire::{FinishReason, Message, TokenUsage, ToolCall, ToolDef, UnifiedRequest, UnifiedResponse};

pub struct OpenAiCodec;

impl OpenAiCodec {
    pub fn new() -> Self {
        Self
    }

    fn encode_message(msg: &Message) -> Value {
        match msg {
            Message::System { content } => json!({"role": "system", "content": content}),
            Message::User { content } => json!({"role": "user", "content": content}),
            Message::Assistant { content, tool_calls } => {
                let mut obj = json!({
                    "role": "assistant",
                    "content": if content.is_empty() { Value::Null } else { json!(content) },
                });
                if !tool_calls.is_empty() {
                    let arr: Vec<Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            let args: Value = tc.arguments.clone().into_iter().collect();
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&args).unwrap_or_default(),
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(arr);
                }
                obj
            }
            Message::Tool { content, tool_call_id } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        }
    }

    fn encode_tool_def(def: &ToolDef) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": def.name,
                "description": def.description,
                "parameters": def.parameters,
            }
        })
    }

    fn map_finish_reason(raw: &str) -> FinishReason {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

impl Default for OpenAiCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireCodec for OpenAiCodec {
    fn kind(&self) -> &'static str {
        "openai"
    }

    fn encode_request(&self, request: &UnifiedRequest) -> Result<Value> {
        let messages: Vec<Value> = request.messages.iter().map(Self::encode_message).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(Self::encode_tool_def).collect();
            body["tools"] = json!(tools);
        }
        Ok(body)
    }

    fn decode_response(&self, body: &[u8]) -> Result<UnifiedResponse> {
        let data: Value = serde_json::from_slice(body)
            .map_err(|e| NekobotError::BadResponse(format!("invalid JSON: {e}")))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| NekobotError::BadResponse("missing choices[0]".into()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| NekobotError::BadResponse("missing choices[0].message".into()))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(arr) = message.get("tool_calls").and_then(Value::as_array) {
            for tc in arr {
                let id = tc.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args_str = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                let args_value: Value = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
                let arguments = match args_value {
                    Value::Object(m) => m.into_iter().collect(),
                    _ => Default::default(),
                };
                tool_calls.push(ToolCall { id, name, arguments });
            }
        }

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(Self::map_finish_reason)
            .unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });

        let usage = data
            .get("usage")
            .map(|u| TokenUsage {
                prompt: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
                total: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(UnifiedResponse {
            id: data.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: data.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
            content,
            thinking: None,
            tool_calls,
            finish_reason,
            usage,
        })
    }

    fn decode_stream_chunk(&self, chunk: &[u8]) -> Result<StreamEvent> {
        let text = std::str::from_utf8(chunk)
            .map_err(|e| NekobotError::BadResponse(format!("non-utf8 SSE chunk: {e}")))?;
        let data = match text.strip_prefix("data: ").or_else(|| text.strip_prefix("data:")) {
            Some(d) => d.trim(),
            None => return Ok(None),
        };
        if data == "[DONE]" {
            return Ok(Some(DeltaEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: None,
            }));
        }
        let json: Value = serde_json::from_str(data)
            .map_err(|e| NekobotError::BadResponse(format!("invalid SSE JSON: {e}")))?;
        let choice = match json.get("choices").and_then(|c| c.get(0)) {
            Some(c) => c,
            None => return Ok(None),
        };

        if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
            let usage = json.get("usage").map(|u| TokenUsage {
                prompt: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
                total: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
            });
            return Ok(Some(DeltaEvent::Done {
                finish_reason: Self::map_finish_reason(fr),
                usage,
            }));
        }

        let delta = match choice.get("delta") {
            Some(d) => d,
            None => return Ok(None),
        };

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                return Ok(Some(DeltaEvent::TextDelta(text.to_string())));
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(Value::as_array) {
            if let Some(tc) = tc_arr.first() {
                let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let id = tc.get("id").and_then(Value::as_str).map(str::to_string);
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let args_fragment = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(Some(DeltaEvent::ToolCallFragment {
                    index,
                    id,
                    name,
                    arguments_fragment: args_fragment,
                }));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ToolCall as WireToolCall;
    use std::collections::HashMap;

    #[test]
    fn encode_request_preserves_tool_calls() {
        let codec = OpenAiCodec::new();
        let mut args = HashMap::new();
        args.insert("path".to_string(), json!("README.md"));
        let req = UnifiedRequest::new(
            "gpt-4o-mini",
            vec![
                Message::user("hello"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![WireToolCall {
                        id: "c1".into(),
                        name: "read_file".into(),
                        arguments: args,
                    }],
                ),
                Message::tool("c1", "# hello"),
            ],
        );
        let body = codec.encode_request(&req).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["tool_calls"][0]["id"], "c1");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "c1");
    }

    #[test]
    fn decode_response_extracts_tool_calls() {
        let codec = OpenAiCodec::new();
        let body = json!({
            "id": "resp1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"README.md\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = codec.decode_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.usage.total, 15);
    }

    #[test]
    fn decode_stream_chunk_done_sentinel() {
        let codec = OpenAiCodec::new();
        let ev = codec.decode_stream_chunk(b"data: [DONE]").unwrap();
        assert!(matches!(ev, Some(DeltaEvent::Done { .. })));
    }

    #[test]
    fn decode_stream_chunk_text_delta() {
        let codec = OpenAiCodec::new();
        let chunk = format!(
            "data: {}",
            json!({"choices":[{"delta":{"content":"hi"}}]})
        );
        let ev = codec.decode_stream_chunk(chunk.as_bytes()).unwrap();
        assert!(matches!(ev, Some(DeltaEvent::TextDelta(s)) if s == "hi"));
    }
}
