//! Pure error classification: `(error, httpStatus?) → FailureReason`.

use regex::Regex;
use std::sync::OnceLock;

/// Taxonomy a vendor failure is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Auth,
    RateLimit,
    Billing,
    Timeout,
    Format,
    Overloaded,
    Unknown,
    Cancelled,
}

impl FailureReason {
    /// `Format` (and by extension image-oversize errors, folded into
    /// `Format`) is the only non-retriable reason. `Overloaded` is treated
    /// as `RateLimit` for retry/cooldown policy purposes but is kept as a
    /// distinct variant for observability.
    pub fn is_retriable(self) -> bool {
        !matches!(self, FailureReason::Format | FailureReason::Cancelled)
    }
}

struct PatternBank {
    rate_limit: Regex,
    overloaded: Regex,
    billing: Regex,
    timeout: Regex,
    auth: Regex,
    format: Regex,
}

fn bank() -> &'static PatternBank {
    static BANK: OnceLock<PatternBank> = OnceLock::new();
    BANK.get_or_init(|| PatternBank {
        rate_limit: Regex::new(r"(?i)rate[\s_-]?limit|too many requests").unwrap(),
        overloaded: Regex::new(r"(?i)overloaded|server is busy|capacity").unwrap(),
        billing: Regex::new(r"(?i)billing|insufficient[\s_]?(quota|credits|funds)|payment required").unwrap(),
        timeout: Regex::new(r"(?i)timed?\s?out|deadline exceeded|timeout").unwrap(),
        auth: Regex::new(r"(?i)unauthorized|invalid[\s_-]?api[\s_-]?key|forbidden|authentication").unwrap(),
        format: Regex::new(
            r"(?i)invalid tool[\s_-]?use id|schema mismatch|invalid request format|image (dimension|size) (exceeds|too large)|unsupported (image|file)",
        )
        .unwrap(),
    })
}

/// Classify a vendor failure. `cancelled` takes precedence over everything:
/// caller-cancellation is never a failover reason. `status` is the HTTP
/// status code if one was received; `message` is the vendor's error text.
pub fn classify(message: &str, status: Option<u16>, cancelled: bool, deadline_exceeded: bool) -> FailureReason {
    if cancelled {
        return FailureReason::Cancelled;
    }
    if deadline_exceeded {
        return FailureReason::Timeout;
    }
    if let Some(code) = status {
        match code {
            401 | 403 => return FailureReason::Auth,
            402 => return FailureReason::Billing,
            408 => return FailureReason::Timeout,
            429 => return FailureReason::RateLimit,
            400 => return FailureReason::Format,
            500 | 502 | 503 | 521 | 522 | 523 | 524 | 529 => return FailureReason::Timeout,
            _ => {}
        }
    }

    let bank = bank();
    if bank.rate_limit.is_match(message) {
        return FailureReason::RateLimit;
    }
    if bank.overloaded.is_match(message) {
        return FailureReason::RateLimit;
    }
    if bank.billing.is_match(message) {
        return FailureReason::Billing;
    }
    if bank.timeout.is_match(message) {
        return FailureReason::Timeout;
    }
    if bank.auth.is_match(message) {
        return FailureReason::Auth;
    }
    if bank.format.is_match(message) {
        return FailureReason::Format;
    }
    FailureReason::Unknown
}

/// True when the error message indicates the model's context window was
/// exceeded, triggering `forceCompress`.
pub fn is_context_limit_error(message: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)context[\s_-]?(length|window)[\s_-]?(exceeded|too long)|maximum context length|too many tokens").unwrap()
    })
    .is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_takes_precedence_over_status() {
        assert_eq!(classify("too many requests", Some(429), true, false), FailureReason::Cancelled);
    }

    #[test]
    fn status_401_is_auth_and_retriable() {
        let r = classify("nope", Some(401), false, false);
        assert_eq!(r, FailureReason::Auth);
        assert!(r.is_retriable());
    }

    #[test]
    fn status_400_is_format_and_not_retriable() {
        let r = classify("invalid request format", Some(400), false, false);
        assert_eq!(r, FailureReason::Format);
        assert!(!r.is_retriable());
    }

    #[test]
    fn transient_5xx_is_timeout() {
        assert_eq!(classify("server error", Some(503), false, false), FailureReason::Timeout);
    }

    #[test]
    fn text_pattern_matches_without_status() {
        assert_eq!(classify("rate limit exceeded, slow down", None, false, false), FailureReason::RateLimit);
        assert_eq!(classify("we are overloaded right now", None, false, false), FailureReason::RateLimit);
    }

    #[test]
    fn context_limit_detection() {
        assert!(is_context_limit_error("This model's maximum context length is 128000 tokens"));
        assert!(!is_context_limit_error("invalid api key"));
    }
}
