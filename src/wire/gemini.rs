//! Gemini-shape codec: `POST {base}/models/{model}:generateContent` (or
//! `:streamGenerateContent`), API key in query + header, role remap
//! `assistant → model` / `tool → user`, streaming is JSON-lines. Function calls carry no IDs from the vendor — synthesized from
//! `name` plus position.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{NekobotError, Result};
use crate::wire::codec::{DeltaEvent, StreamEvent, WireCodec};
use crate::wire::{FinishReason, Message, TokenUsage, ToolCall, ToolDef, UnifiedRequest, UnifiedResponse};

pub struct GeminiCodec;

impl GeminiCodec {
    pub fn new() -> Self {
        Self
    }

    fn encode_tool_def(def: &ToolDef) -> Value {
        json!({
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        })
    }

    fn map_finish_reason(raw: &str) -> FinishReason {
        match raw {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }

    fn synth_call_id(name: &str, position: usize) -> String {
        format!("gemini_call_{name}_{position}")
    }
}

impl Default for GeminiCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireCodec for GeminiCodec {
    fn kind(&self) -> &'static str {
        "gemini"
    }

    fn encode_request(&self, request: &UnifiedRequest) -> Result<Value> {
        let system: String = request
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::System { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut contents = Vec::new();
        for msg in &request.messages {
            match msg {
                Message::System { .. } => {}
                Message::User { content } => {
                    contents.push(json!({"role": "user", "parts": [{"text": content}]}));
                }
                Message::Assistant { content, tool_calls } => {
                    let mut parts = Vec::new();
                    if !content.is_empty() {
                        parts.push(json!({"text": content}));
                    }
                    for tc in tool_calls {
                        let args: Value = tc.arguments.clone().into_iter().collect();
                        parts.push(json!({"functionCall": {"name": tc.name, "args": args}}));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                Message::Tool { content, tool_call_id } => {
                    // Gemini has no tool_call_id on the wire; we carry the
                    // tool's name in tool_call_id (the agent loop sets this
                    // to the tool's name for this codec's messages).
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": tool_call_id,
                                "response": {"content": content}
                            }
                        }]
                    }));
                }
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !request.tools.is_empty() {
            let decls: Vec<Value> = request.tools.iter().map(Self::encode_tool_def).collect();
            body["tools"] = json!([{"functionDeclarations": decls}]);
        }

        Ok(body)
    }

    fn decode_response(&self, body: &[u8]) -> Result<UnifiedResponse> {
        let data: Value = serde_json::from_slice(body)
            .map_err(|e| NekobotError::BadResponse(format!("invalid JSON: {e}")))?;

        let candidate = data
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| NekobotError::BadResponse("missing candidates[0]".into()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for (i, part) in parts.iter().enumerate() {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(t);
                }
                if let Some(fc) = part.get("functionCall") {
                    let name = fc.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let arguments = match fc.get("args").cloned().unwrap_or(json!({})) {
                        Value::Object(m) => m.into_iter().collect(),
                        _ => Default::default(),
                    };
                    tool_calls.push(ToolCall {
                        id: Self::synth_call_id(&name, i),
                        name,
                        arguments,
                    });
                }
            }
        }

        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(Self::map_finish_reason)
            .unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });

        let usage = data
            .get("usageMetadata")
            .map(|u| {
                let prompt = u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
                let completion = u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);
                TokenUsage {
                    prompt,
                    completion,
                    total: u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(prompt + completion),
                }
            })
            .unwrap_or_default();

        Ok(UnifiedResponse {
            id: String::new(),
            model: String::new(),
            content,
            thinking: None,
            tool_calls,
            finish_reason,
            usage,
        })
    }

    fn decode_stream_chunk(&self, chunk: &[u8]) -> Result<StreamEvent> {
        // Gemini streams JSON-lines: one JSON object per line (no SSE framing).
        let text = std::str::from_utf8(chunk)
            .map_err(|e| NekobotError::BadResponse(format!("non-utf8 chunk: {e}")))?
            .trim();
        if text.is_empty() {
            return Ok(None);
        }
        let trimmed = text.trim_start_matches('[').trim_end_matches(',').trim_end_matches(']');
        if trimmed.is_empty() {
            return Ok(None);
        }
        let json: Value = serde_json::from_str(trimmed)
            .map_err(|e| NekobotError::BadResponse(format!("invalid JSON-lines chunk: {e}")))?;

        let candidate = match json.get("candidates").and_then(|c| c.get(0)) {
            Some(c) => c,
            None => return Ok(None),
        };

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            if let Some(part) = parts.first() {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    return Ok(Some(DeltaEvent::TextDelta(t.to_string())));
                }
                if let Some(fc) = part.get("functionCall") {
                    let name = fc.get("name").and_then(Value::as_str).map(str::to_string);
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    return Ok(Some(DeltaEvent::ToolCallFragment {
                        index: 0,
                        id: None,
                        name,
                        arguments_fragment: args.to_string(),
                    }));
                }
            }
        }

        if let Some(fr) = candidate.get("finishReason").and_then(Value::as_str) {
            return Ok(Some(DeltaEvent::Done {
                finish_reason: Self::map_finish_reason(fr),
                usage: None,
            }));
        }

        Ok(None)
    }
}
