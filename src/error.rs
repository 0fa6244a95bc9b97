//! The error taxonomy visible to callers of the agent loop.
//!
//! Tool-execution errors and context-window errors are recovered locally
//! inside [`crate::agent`] and never surface as one of these variants.
//! Everything else propagates unchanged.

use crate::failure::FailureReason;

/// Top-level error type returned by the core.
#[derive(Debug, thiserror::Error)]
pub enum NekobotError {
    /// A single provider failed in a way the executor considered
    /// non-retriable (e.g. `Format`).
    #[error("provider {provider} failed ({reason:?}): {wrapped}")]
    FailoverError {
        reason: FailureReason,
        provider: String,
        model: String,
        status: Option<u16>,
        wrapped: String,
    },

    /// Every provider in the order was tried or skipped; none succeeded.
    #[error("all providers exhausted: {attempts:?}")]
    FallbackExhausted { attempts: Vec<AttemptRecord> },

    /// The loop ran `max` turns without producing a final response.
    #[error("iteration limit exceeded (max={max})")]
    IterationLimitExceeded { max: u32 },

    /// The ambient cancel signal fired during this call.
    #[error("cancelled")]
    Cancelled,

    /// Codec/JSON/unexpected parse failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// A vendor response could not be decoded as valid JSON for its shape.
    #[error("bad response from provider: {0}")]
    BadResponse(String),

    /// The HTTP status from a vendor was non-2xx.
    #[error("provider error {status_code}: {message}")]
    ProviderError {
        status_code: u16,
        message: String,
        error_type: Option<String>,
        code: Option<String>,
    },
}

impl NekobotError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NekobotError::Cancelled)
    }
}

/// One entry in a [`NekobotError::FallbackExhausted`] journal.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub reason: Option<FailureReason>,
    pub skipped: bool,
    pub error: String,
}

pub type Result<T> = std::result::Result<T, NekobotError>;
