//! The model/tool iteration loop: assembles context, calls the
//! model through failover, dispatches any requested tool calls through the
//! approval gate, and repeats until a final response or an iteration/context
//! limit is hit.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::context::ContextBuilder;
use crate::error::{NekobotError, Result};
use crate::failover::ModelCaller;
use crate::failure::is_context_limit_error;
use crate::ports::{ApprovalChecker, ApprovalDecision, Session, ToolExecutor};
use crate::sanitize::{sanitize, trim_trailing_current_user_message};
use crate::wire::{Message, ToolDef, UnifiedRequest};

const DENIED_RESULT: &str = "Tool call denied by approval policy";
const PENDING_RESULT: &str = "Tool call pending approval";

pub struct AgentConfig {
    pub provider_order: Vec<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: u32,
    pub max_context_retries: u32,
    pub extended_thinking: bool,
    pub thinking_budget: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider_order: Vec::new(),
            model: String::new(),
            max_tokens: 4096,
            temperature: 1.0,
            max_iterations: 25,
            max_context_retries: 3,
            extended_thinking: false,
            thinking_budget: None,
        }
    }
}

impl From<&crate::config::schema::AgentDefaults> for AgentConfig {
    /// Builds the per-run config from `agents.defaults`; `provider_order` is
    /// `[provider] ++ fallback`, the routing.provider/routing.fallback split
    /// the loop's pseudocode assumes.
    fn from(defaults: &crate::config::schema::AgentDefaults) -> Self {
        let mut provider_order = Vec::with_capacity(1 + defaults.fallback.len());
        if !defaults.provider.is_empty() {
            provider_order.push(defaults.provider.clone());
        }
        provider_order.extend(defaults.fallback.iter().cloned());

        Self {
            provider_order,
            model: defaults.model.clone(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            max_iterations: defaults.max_tool_iterations,
            max_context_retries: 3,
            extended_thinking: defaults.extended_thinking,
            thinking_budget: defaults.thinking_budget,
        }
    }
}

pub struct AgentLoop {
    caller: Arc<dyn ModelCaller>,
    context: Arc<ContextBuilder>,
    tools: Arc<dyn ToolExecutor>,
    approval: Arc<dyn ApprovalChecker>,
    tool_defs: Vec<ToolDef>,
}

impl AgentLoop {
    pub fn new(
        caller: Arc<dyn ModelCaller>,
        context: Arc<ContextBuilder>,
        tools: Arc<dyn ToolExecutor>,
        approval: Arc<dyn ApprovalChecker>,
        tool_defs: Vec<ToolDef>,
    ) -> Self {
        Self {
            caller,
            context,
            tools,
            approval,
            tool_defs,
        }
    }

    /// Run one user turn to completion and return the model's final text.
    /// `session` holds the prior conversation (unsanitized; this function
    /// sanitizes it) and is appended to as the turn produces new messages —
    /// sessions outlive a single run, so the core never deletes from it.
    /// `cancel` is checked at each iteration boundary; a cancelled run stops
    /// without recording a failover reason against any provider.
    pub async fn run(&self, config: &AgentConfig, session: &dyn Session, user_message: &str, cancel: &CancelToken) -> Result<String> {
        let system_prompt = self.context.build(&self.tool_defs, "").await?;

        let history = session.get_messages().await;
        let current = Message::user(user_message);
        let cleaned = sanitize(&history);
        let cleaned = trim_trailing_current_user_message(&cleaned, &current);

        session.append(current.clone()).await;

        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(cleaned);
        messages.push(current);

        for _iteration in 0..config.max_iterations {
            if cancel.is_cancelled() {
                log::info!("agent: cancelled before iteration");
                return Err(NekobotError::Cancelled);
            }

            let response = self.call_with_compression(config, &mut messages, cancel).await?;

            if !response.has_tool_calls() {
                session.append(Message::assistant(response.content.clone())).await;
                return Ok(response.content);
            }

            let assistant_msg = Message::assistant_with_tool_calls(response.content, response.tool_calls.clone());
            messages.push(assistant_msg.clone());
            session.append(assistant_msg).await;

            for call in &response.tool_calls {
                if cancel.is_cancelled() {
                    log::info!("agent: cancelled before dispatching tool call '{}'", call.name);
                    return Err(NekobotError::Cancelled);
                }

                let result_text = match self.approval.check(&call.name, &call.arguments).await {
                    ApprovalDecision::Approved => match self.tools.execute(&call.name, &call.arguments, cancel).await {
                        Ok(output) => output,
                        Err(err) => format!("Error: {err}"),
                    },
                    ApprovalDecision::Denied { reason } => {
                        log::info!("agent: tool call '{}' denied ({reason})", call.name);
                        DENIED_RESULT.to_string()
                    }
                    ApprovalDecision::Pending => PENDING_RESULT.to_string(),
                };

                let tool_call_id = if self.is_gemini_style() {
                    call.name.clone()
                } else {
                    call.id.clone()
                };
                let tool_msg = Message::tool(tool_call_id, result_text);
                messages.push(tool_msg.clone());
                session.append(tool_msg).await;
            }
        }

        Err(NekobotError::IterationLimitExceeded { max: config.max_iterations })
    }

    /// Provider kind awareness for the one wire-format divergence that
    /// leaks into message construction: Gemini correlates tool results by
    /// function name, not call ID (see `wire::gemini`).
    fn is_gemini_style(&self) -> bool {
        false
    }

    /// Compacts `messages` in place on a context-limit error, so the
    /// compaction persists into the caller's outer history for later
    /// iterations of the same run instead of being rederived from scratch.
    async fn call_with_compression(&self, config: &AgentConfig, messages: &mut Vec<Message>, cancel: &CancelToken) -> Result<crate::wire::UnifiedResponse> {
        for _retry in 0..=config.max_context_retries {
            let mut request = UnifiedRequest::new(config.model.clone(), messages.clone());
            request.tools = self.tool_defs.clone();
            request.max_tokens = config.max_tokens;
            request.temperature = config.temperature;
            if config.extended_thinking {
                request.extra.insert("extended_thinking".into(), serde_json::json!(true));
                if let Some(budget) = config.thinking_budget {
                    request.extra.insert("thinking_budget".into(), serde_json::json!(budget));
                }
            }

            match self.caller.execute(&config.provider_order, &request, cancel).await {
                Ok(response) => return Ok(response),
                Err(NekobotError::FailoverError { reason, wrapped, .. })
                    if is_context_limit_error(&wrapped) =>
                {
                    log::info!("agent: context limit hit ({reason:?}), compacting history");
                    *messages = force_compress(messages);
                }
                Err(other) => return Err(other),
            }
        }

        Err(NekobotError::Internal(
            "exceeded max context-compaction retries without recovering".to_string(),
        ))
    }
}

/// Deterministic compaction (no LLM call involved): keeps the leading
/// message untouched, drops the oldest half of everything after it, and
/// records how many were dropped.
pub fn force_compress(messages: &[Message]) -> Vec<Message> {
    if messages.len() < 3 {
        return messages.to_vec();
    }
    let (first, rest) = messages.split_first().expect("len >= 3");
    let drop_count = rest.len() / 2;
    let kept = &rest[drop_count..];

    let mut out = Vec::with_capacity(kept.len() + 2);
    out.push(first.clone());
    out.push(Message::user(format!(
        "[context compacted: {drop_count} earlier message(s) were dropped to fit the context window]"
    )));
    out.extend_from_slice(kept);
    out
}
