//! Per-vendor HTTP adaptor: pairs a [`WireCodec`] with an HTTP client
//! configured for one provider profile.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use zeroize::Zeroizing;

use crate::cancel::CancelToken;
use crate::error::{NekobotError, Result};
use crate::wire::anthropic::{AnthropicCodec, ANTHROPIC_VERSION};
use crate::wire::gemini::GeminiCodec;
use crate::wire::openai::OpenAiCodec;
use crate::wire::{DeltaEvent, UnifiedRequest, UnifiedResponse, WireCodec};

/// One configured provider profile: a vendor kind, base URL, credentials,
/// and the HTTP client that enforces its timeout/proxy policy.
pub struct ProviderProfile {
    pub name: String,
    pub kind: String,
    pub api_key: Zeroizing<String>,
    pub api_base: String,
    pub codec: Arc<dyn WireCodec>,
    pub client: reqwest::Client,
    pub models: Vec<String>,
    pub default_model: Option<String>,
}

impl ProviderProfile {
    /// The model to send for a given request: the requested model if this
    /// provider serves it, else this provider's configured default
    /// when falling back to another provider.
    pub fn resolve_model(&self, requested: &str) -> Option<String> {
        if self.models.is_empty() || self.models.iter().any(|m| m == requested) {
            Some(requested.to_string())
        } else {
            self.default_model.clone()
        }
    }
}

impl ProviderProfile {
    /// A one-shot (non-streaming) call against this provider. Checked
    /// against `cancel` before issuing the request; the ambient signal is
    /// polled at this boundary rather than preempting an in-flight send.
    pub async fn call(&self, request: &UnifiedRequest, cancel: &CancelToken) -> Result<UnifiedResponse> {
        if cancel.is_cancelled() {
            return Err(NekobotError::Cancelled);
        }

        let request_id = uuid::Uuid::new_v4();
        log::debug!("adaptor: '{}' request {request_id} model={}", self.name, request.model);

        let body = self.codec.encode_request(request)?;
        let resp = self
            .build_request(request.stream, &request.model)
            .json(&body)
            .send()
            .await
            .map_err(|e| NekobotError::Internal(format!("request to '{}' failed: {e}", self.name)))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| NekobotError::Internal(format!("reading response from '{}' failed: {e}", self.name)))?;

        if !status.is_success() {
            return Err(decode_error_body(status.as_u16(), &bytes));
        }

        self.codec.decode_response(&bytes)
    }

    /// Streaming call: returns a boxed stream of decoded delta events. SSE
    /// framing (OpenAI/Anthropic-shape) is reassembled via
    /// `eventsource-stream`; Gemini's JSON-lines body is split directly on
    /// raw chunk boundaries, matching how its vendor actually frames
    /// `:streamGenerateContent` responses.
    pub async fn stream_call(
        &self,
        request: &UnifiedRequest,
        cancel: &CancelToken,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<DeltaEvent>> + Send>>> {
        if cancel.is_cancelled() {
            return Err(NekobotError::Cancelled);
        }

        let mut streaming_request = request.clone();
        streaming_request.stream = true;

        let body = self.codec.encode_request(&streaming_request)?;
        let resp = self
            .build_request(true, &streaming_request.model)
            .json(&body)
            .send()
            .await
            .map_err(|e| NekobotError::Internal(format!("stream request to '{}' failed: {e}", self.name)))?;

        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(decode_error_body(status.as_u16(), &bytes));
        }

        let codec = Arc::clone(&self.codec);

        if self.kind == "gemini" {
            let stream = resp.bytes_stream().map(move |chunk| {
                let chunk = chunk.map_err(|e| NekobotError::Internal(format!("stream read failed: {e}")))?;
                codec.decode_stream_chunk(&chunk)
            });
            Ok(Box::pin(stream.filter_map(|r| async move {
                match r {
                    Ok(Some(ev)) => Some(Ok(ev)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            })))
        } else {
            let is_anthropic = self.kind == "anthropic";
            let stream = resp.bytes_stream().eventsource().map(move |event| {
                let event = event.map_err(|e| NekobotError::Internal(format!("SSE stream error: {e}")))?;
                let raw = if is_anthropic {
                    format!("event: {}\ndata: {}\n\n", event.event, event.data)
                } else {
                    format!("data: {}", event.data)
                };
                codec.decode_stream_chunk(raw.as_bytes())
            });
            Ok(Box::pin(stream.filter_map(|r| async move {
                match r {
                    Ok(Some(ev)) => Some(Ok(ev)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            })))
        }
    }

    fn build_request(&self, streaming: bool, model: &str) -> reqwest::RequestBuilder {
        let url = match self.kind.as_str() {
            "anthropic" => format!("{}/messages", self.api_base.trim_end_matches('/')),
            "gemini" => {
                let verb = if streaming {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                format!(
                    "{}/models/{model}:{verb}?key={}",
                    self.api_base.trim_end_matches('/'),
                    self.api_key.as_str()
                )
            }
            _ => format!("{}/chat/completions", self.api_base.trim_end_matches('/')),
        };
        let mut builder = self.client.post(url);
        builder = match self.kind.as_str() {
            "anthropic" => builder
                .header("x-api-key", self.api_key.as_str())
                .header("anthropic-version", ANTHROPIC_VERSION),
            "gemini" => builder,
            _ => builder.bearer_auth(self.api_key.as_str()),
        };
        builder.header("content-type", "application/json")
    }

    /// Lightweight connectivity probe, not a billed completion call.
    pub async fn probe(&self) -> Result<()> {
        let resp = match self.kind.as_str() {
            "anthropic" => {
                self.client
                    .post(format!("{}/messages", self.api_base.trim_end_matches('/')))
                    .header("x-api-key", self.api_key.as_str())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&serde_json::json!({
                        "model": "claude-3-haiku-20240307",
                        "max_tokens": 1,
                        "messages": [{"role": "user", "content": "ping"}]
                    }))
                    .send()
                    .await
            }
            "gemini" => {
                self.client
                    .get(format!(
                        "{}/models?key={}",
                        self.api_base.trim_end_matches('/'),
                        self.api_key.as_str()
                    ))
                    .send()
                    .await
            }
            _ => {
                self.client
                    .get(format!("{}/models", self.api_base.trim_end_matches('/')))
                    .bearer_auth(self.api_key.as_str())
                    .send()
                    .await
            }
        }
        .map_err(|e| NekobotError::Internal(format!("probe of '{}' failed: {e}", self.name)))?;

        if resp.status().is_success() || resp.status().as_u16() == 405 {
            Ok(())
        } else {
            Err(decode_error_body(resp.status().as_u16(), b""))
        }
    }
}

fn decode_error_body(status: u16, bytes: &[u8]) -> NekobotError {
    let parsed: serde_json::Value = serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null);
    let message = parsed
        .get("error")
        .and_then(|e| e.get("message").or(e.as_str().map(|_| e)))
        .and_then(|m| m.as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).trim().to_string());
    let error_type = parsed
        .get("error")
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .map(str::to_string);
    let code = parsed
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str().map(str::to_string).or_else(|| c.as_u64().map(|n| n.to_string())));
    NekobotError::ProviderError {
        status_code: status,
        message,
        error_type,
        code,
    }
}

/// Aliases that resolve to a generic OpenAI-compatible codec.
fn canonical_kind(kind: &str) -> &str {
    match kind {
        "openrouter" | "groq" | "deepseek" | "ollama" | "generic" => "openai",
        other => other,
    }
}

fn codec_for_kind(kind: &str) -> Result<Arc<dyn WireCodec>> {
    match canonical_kind(kind) {
        "openai" => Ok(Arc::new(OpenAiCodec::new())),
        "anthropic" => Ok(Arc::new(AnthropicCodec::new())),
        "gemini" => Ok(Arc::new(GeminiCodec::new())),
        other => Err(NekobotError::Internal(format!("unknown provider kind '{other}'"))),
    }
}

/// The single permitted mutable-at-startup singleton: a
/// read-mostly registry of configured provider profiles, built once at
/// boot and consulted by name for the rest of the process lifetime.
#[derive(Default)]
pub struct AdaptorRegistry {
    profiles: HashMap<String, Arc<ProviderProfile>>,
}

pub struct ProviderSpec {
    pub name: String,
    pub kind: String,
    pub api_key: String,
    pub api_base: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub models: Vec<String>,
    pub default_model: Option<String>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a loaded [`crate::config::Config`]'s
    /// `providers` table.
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let mut registry = Self::new();
        for entry in &config.providers {
            registry.register(ProviderSpec {
                name: entry.name.clone(),
                kind: entry.kind.clone(),
                api_key: entry.api_key.clone(),
                api_base: entry.api_base.clone(),
                proxy: entry.proxy.clone(),
                timeout: Duration::from_secs(entry.timeout_secs),
                models: entry.models.clone(),
                default_model: entry.default_model.clone(),
            })?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: ProviderSpec) -> Result<()> {
        let codec = codec_for_kind(&spec.kind)?;
        if !spec.api_base.is_empty() {
            url::Url::parse(&spec.api_base)
                .map_err(|e| NekobotError::Internal(format!("invalid api_base for '{}': {e}", spec.name)))?;
        }
        let mut builder = reqwest::Client::builder().timeout(spec.timeout);
        if let Some(proxy_url) = &spec.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| NekobotError::Internal(format!("invalid proxy url '{proxy_url}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| NekobotError::Internal(format!("building client for '{}' failed: {e}", spec.name)))?;

        log::debug!("adaptor: registered provider '{}' (kind={})", spec.name, spec.kind);
        self.profiles.insert(
            spec.name.clone(),
            Arc::new(ProviderProfile {
                name: spec.name,
                kind: spec.kind,
                api_key: Zeroizing::new(spec.api_key),
                api_base: spec.api_base,
                codec,
                client,
                models: spec.models,
                default_model: spec.default_model,
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderProfile>> {
        self.profiles.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_resolves_aliases() {
        let mut registry = AdaptorRegistry::new();
        registry
            .register(ProviderSpec {
                name: "groq-main".into(),
                kind: "groq".into(),
                api_key: "k".into(),
                api_base: "https://api.groq.com/openai/v1".into(),
                proxy: None,
                timeout: Duration::from_secs(60),
                models: vec!["llama-3.1-70b".into()],
                default_model: Some("llama-3.1-70b".into()),
            })
            .unwrap();
        let profile = registry.get("groq-main").unwrap();
        assert_eq!(profile.codec.kind(), "openai");
        assert_eq!(profile.resolve_model("llama-3.1-70b").as_deref(), Some("llama-3.1-70b"));
        assert_eq!(profile.resolve_model("gpt-4o").as_deref(), Some("llama-3.1-70b"));
    }

    #[test]
    fn builds_from_config() {
        let mut config = crate::config::Config::default();
        config.providers.push(crate::config::schema::ProviderEntry {
            name: "primary".into(),
            kind: "openai".into(),
            api_key: "sk-test".into(),
            api_base: "https://api.openai.com/v1".into(),
            proxy: None,
            timeout_secs: 60,
            models: vec![],
            default_model: None,
        });
        let registry = AdaptorRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["primary".to_string()]);
    }

    #[test]
    fn gemini_url_substitutes_the_resolved_model() {
        let mut registry = AdaptorRegistry::new();
        registry
            .register(ProviderSpec {
                name: "gem".into(),
                kind: "gemini".into(),
                api_key: "k".into(),
                api_base: "https://generativelanguage.googleapis.com/v1beta".into(),
                proxy: None,
                timeout: Duration::from_secs(60),
                models: vec![],
                default_model: None,
            })
            .unwrap();
        let profile = registry.get("gem").unwrap();
        let request = profile.build_request(false, "gemini-1.5-pro");
        let built = request.build().unwrap();
        assert_eq!(
            built.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent?key=k"
        );
    }

    #[test]
    fn unknown_kind_errors() {
        let mut registry = AdaptorRegistry::new();
        let err = registry.register(ProviderSpec {
            name: "x".into(),
            kind: "carrier-pigeon".into(),
            api_key: String::new(),
            api_base: String::new(),
            proxy: None,
            timeout: Duration::from_secs(1),
            models: Vec::new(),
            default_model: None,
        });
        assert!(err.is_err());
    }
}
