pub mod adaptor;
pub mod agent;
pub mod cancel;
pub mod config;
pub mod context;
pub mod cooldown;
pub mod error;
pub mod failover;
pub mod failure;
pub mod ports;
pub mod sanitize;
pub mod wire;

/// Initializes `env_logger` for a test binary, ignoring the "already
/// initialized" error so every test can call this unconditionally.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Convenience re-exports for the most commonly used types and traits.
///
/// ```rust
/// use nekobot_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adaptor::{AdaptorRegistry, ProviderProfile, ProviderSpec};
    pub use crate::agent::{AgentConfig, AgentLoop};
    pub use crate::cancel::CancelToken;
    pub use crate::config::Config;
    pub use crate::context::ContextBuilder;
    pub use crate::cooldown::{Clock, CooldownConfig, CooldownTracker, SystemClock};
    pub use crate::error::{NekobotError, Result};
    pub use crate::failover::{FailoverExecutor, ModelCaller};
    pub use crate::failure::{classify, FailureReason};
    pub use crate::ports::{ApprovalChecker, ApprovalDecision, MemoryReader, Session, ToolExecutor};
    pub use crate::wire::{
        FinishReason, Message, TokenUsage, ToolCall, ToolCallAccumulator, ToolDef, UnifiedRequest,
        UnifiedResponse, WireCodec,
    };
}
