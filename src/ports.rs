//! External-collaborator contracts. The core depends on
//! these traits but never provides concrete implementations of them —
//! tool execution, approval policy, session storage, and long-term memory
//! are all owned by the embedding application.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::wire::Message;

/// Runs a single tool call and returns its textual result. Implementors
/// decide sandboxing, timeouts, and side effects; the agent loop only
/// sees success/failure. `cancel` is the ambient cancellation signal for
/// the surrounding run; a long-lived tool execution should poll it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &HashMap<String, Value>, cancel: &CancelToken) -> Result<String, String>;
}

/// Outcome of an approval check for a pending tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
    Pending,
}

#[async_trait]
pub trait ApprovalChecker: Send + Sync {
    async fn check(&self, tool_name: &str, arguments: &HashMap<String, Value>) -> ApprovalDecision;
}

/// Conversation persistence the loop reads from and appends to. Owned by
/// the embedding application (e.g. a per-channel session router).
#[async_trait]
pub trait Session: Send + Sync {
    async fn get_messages(&self) -> Vec<Message>;
    async fn append(&self, message: Message);
}

/// Read-only access to long-term/daily memory sections used by
/// `ContextBuilder`'s dynamic suffix.
#[async_trait]
pub trait MemoryReader: Send + Sync {
    /// Curated long-term memory document, if any.
    async fn read_long_term(&self) -> Option<String>;
    /// Daily diary entries for the last `days` calendar days, most recent first.
    async fn read_recent_daily(&self, days: u32) -> Vec<(String, String)>;
}
