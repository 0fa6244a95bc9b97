//! Ordered-provider failover with cooldown-gated skipping and model
//! substitution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::adaptor::AdaptorRegistry;
use crate::cancel::CancelToken;
use crate::cooldown::CooldownTracker;
use crate::error::{AttemptRecord, NekobotError, Result};
use crate::failure::{classify, FailureReason};
use crate::wire::UnifiedRequest;
use crate::wire::UnifiedResponse;

/// The seam [`crate::agent::AgentLoop`] calls through, so tests can drive
/// the loop with a scripted responder instead of real HTTP.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn execute(&self, order: &[String], request: &UnifiedRequest, cancel: &CancelToken) -> Result<UnifiedResponse>;
}

pub struct FailoverExecutor {
    registry: Arc<AdaptorRegistry>,
    cooldown: Arc<CooldownTracker>,
}

impl FailoverExecutor {
    pub fn new(registry: Arc<AdaptorRegistry>, cooldown: Arc<CooldownTracker>) -> Self {
        Self { registry, cooldown }
    }

    /// Try each provider in `order`, substituting the model for any
    /// provider after the first that doesn't serve the requested one.
    /// Returns the first success; aborts immediately on a non-retriable
    /// failure; returns `FallbackExhausted` once the order is used up.
    /// Checked at each provider-loop boundary: cancellation is never
    /// recorded as a provider failure and never consults the cooldown.
    pub async fn execute(&self, order: &[String], request: &UnifiedRequest, cancel: &CancelToken) -> Result<UnifiedResponse> {
        let mut attempts = Vec::with_capacity(order.len());

        for (i, provider_name) in order.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("failover: cancelled before attempting '{provider_name}'");
                return Err(NekobotError::Cancelled);
            }

            if !self.cooldown.is_available(provider_name) {
                let reason = self.cooldown.last_reason(provider_name);
                log::debug!("failover: skipping '{provider_name}' ({reason:?}), under cooldown");
                attempts.push(AttemptRecord {
                    provider: provider_name.clone(),
                    reason,
                    skipped: true,
                    error: "provider in cooldown".to_string(),
                });
                continue;
            }

            let profile = match self.registry.get(provider_name) {
                Some(p) => p,
                None => {
                    attempts.push(AttemptRecord {
                        provider: provider_name.clone(),
                        reason: None,
                        skipped: true,
                        error: "not registered".to_string(),
                    });
                    continue;
                }
            };

            let model = if i == 0 {
                request.model.clone()
            } else {
                profile.resolve_model(&request.model).unwrap_or_else(|| {
                    log::warn!(
                        "failover: '{provider_name}' has no default model, falling back to requested '{}' anyway",
                        request.model
                    );
                    request.model.clone()
                })
            };
            if model != request.model {
                log::warn!("failover: substituting model '{}' -> '{model}' for provider '{provider_name}'", request.model);
            }

            let mut attempt_request = request.clone();
            attempt_request.model = model.clone();

            match profile.call(&attempt_request, cancel).await {
                Ok(response) => {
                    log::info!("failover: '{provider_name}' succeeded");
                    self.cooldown.mark_success(provider_name);
                    return Ok(response);
                }
                Err(err) if err.is_cancelled() => {
                    log::info!("failover: '{provider_name}' call cancelled");
                    return Err(NekobotError::Cancelled);
                }
                Err(err) => {
                    let (message, status) = error_parts(&err);
                    let reason = classify(&message, status, false, false);
                    self.cooldown.mark_failure(provider_name, reason);
                    log::warn!("failover: '{provider_name}' failed ({reason:?}): {message}");

                    attempts.push(AttemptRecord {
                        provider: provider_name.clone(),
                        reason: Some(reason),
                        skipped: false,
                        error: message.clone(),
                    });

                    if !reason.is_retriable() {
                        return Err(NekobotError::FailoverError {
                            reason,
                            provider: provider_name.clone(),
                            model,
                            status,
                            wrapped: message,
                        });
                    }
                }
            }
        }

        Err(NekobotError::FallbackExhausted { attempts })
    }
}

#[async_trait]
impl ModelCaller for FailoverExecutor {
    async fn execute(&self, order: &[String], request: &UnifiedRequest, cancel: &CancelToken) -> Result<UnifiedResponse> {
        FailoverExecutor::execute(self, order, request, cancel).await
    }
}

fn error_parts(err: &NekobotError) -> (String, Option<u16>) {
    match err {
        NekobotError::ProviderError { status_code, message, .. } => (message.clone(), Some(*status_code)),
        NekobotError::BadResponse(msg) => (msg.clone(), None),
        NekobotError::Internal(msg) => (msg.clone(), None),
        other => (other.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::{AdaptorRegistry, ProviderSpec};
    use crate::cooldown::{CooldownConfig, CooldownTracker};
    use crate::wire::Message;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn req() -> UnifiedRequest {
        UnifiedRequest::new("gpt-4o-mini", vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn succeeds_on_first_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "r1", "model": "gpt-4o-mini",
                "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .mount(&server)
            .await;

        let mut registry = AdaptorRegistry::new();
        registry
            .register(ProviderSpec {
                name: "primary".into(),
                kind: "openai".into(),
                api_key: "k".into(),
                api_base: server.uri(),
                proxy: None,
                timeout: Duration::from_secs(5),
                models: vec![],
                default_model: None,
            })
            .unwrap();

        let cooldown = Arc::new(CooldownTracker::new(CooldownConfig::default()));
        let executor = FailoverExecutor::new(Arc::new(registry), cooldown);
        let resp = executor.execute(&["primary".to_string()], &req(), &CancelToken::new()).await.unwrap();
        assert_eq!(resp.content, "hello");
    }

    #[tokio::test]
    async fn falls_back_after_retriable_failure() {
        crate::init_test_logging();
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "rate limited"}
            })))
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "r2", "model": "gpt-4o-mini",
                "choices": [{"message": {"content": "fallback worked"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .mount(&good)
            .await;

        let mut registry = AdaptorRegistry::new();
        registry
            .register(ProviderSpec {
                name: "flaky".into(),
                kind: "openai".into(),
                api_key: "k".into(),
                api_base: bad.uri(),
                proxy: None,
                timeout: Duration::from_secs(5),
                models: vec![],
                default_model: None,
            })
            .unwrap();
        registry
            .register(ProviderSpec {
                name: "backup".into(),
                kind: "openai".into(),
                api_key: "k".into(),
                api_base: good.uri(),
                proxy: None,
                timeout: Duration::from_secs(5),
                models: vec![],
                default_model: None,
            })
            .unwrap();

        let cooldown = Arc::new(CooldownTracker::new(CooldownConfig::default()));
        let executor = FailoverExecutor::new(Arc::new(registry), cooldown);
        let resp = executor
            .execute(&["flaky".to_string(), "backup".to_string()], &req(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(resp.content, "fallback worked");
    }

    #[tokio::test]
    async fn aborts_immediately_on_format_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "invalid request format"}
            })))
            .mount(&server)
            .await;

        let mut registry = AdaptorRegistry::new();
        registry
            .register(ProviderSpec {
                name: "only".into(),
                kind: "openai".into(),
                api_key: "k".into(),
                api_base: server.uri(),
                proxy: None,
                timeout: Duration::from_secs(5),
                models: vec![],
                default_model: None,
            })
            .unwrap();

        let cooldown = Arc::new(CooldownTracker::new(CooldownConfig::default()));
        let executor = FailoverExecutor::new(Arc::new(registry), cooldown);
        let err = executor.execute(&["only".to_string()], &req(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, NekobotError::FailoverError { reason: FailureReason::Format, .. }));
    }

    #[tokio::test]
    async fn exhausts_when_all_providers_unavailable() {
        let cooldown = Arc::new(CooldownTracker::new(CooldownConfig::default()));
        let registry = Arc::new(AdaptorRegistry::new());
        let executor = FailoverExecutor::new(registry, cooldown);
        let err = executor.execute(&["ghost".to_string()], &req(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, NekobotError::FallbackExhausted { .. }));
    }

    #[tokio::test]
    async fn all_providers_in_cooldown_skips_without_http_calls() {
        let mut registry = AdaptorRegistry::new();
        for name in ["p1", "p2"] {
            registry
                .register(ProviderSpec {
                    name: name.into(),
                    kind: "openai".into(),
                    api_key: "k".into(),
                    // Any unreachable address; a real call here would fail the test.
                    api_base: "http://127.0.0.1:0".into(),
                    proxy: None,
                    timeout: Duration::from_secs(5),
                    models: vec![],
                    default_model: None,
                })
                .unwrap();
        }

        let cooldown = Arc::new(CooldownTracker::new(CooldownConfig { error_threshold: 1, ..Default::default() }));
        cooldown.mark_failure("p1", FailureReason::RateLimit);
        cooldown.mark_failure("p2", FailureReason::RateLimit);

        let executor = FailoverExecutor::new(Arc::new(registry), cooldown);
        let err = executor
            .execute(&["p1".to_string(), "p2".to_string()], &req(), &CancelToken::new())
            .await
            .unwrap_err();

        match err {
            NekobotError::FallbackExhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                for attempt in &attempts {
                    assert!(attempt.skipped);
                    assert_eq!(attempt.reason, Some(FailureReason::RateLimit));
                }
            }
            other => panic!("expected FallbackExhausted, got {other:?}"),
        }
    }
}
