//! Per-provider failure tracking and quarantine.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::failure::FailureReason;

/// Injectable clock so tests can drive time forward deterministically
/// (window resets and quarantine expiry both depend on elapsed time).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-provider entry.
#[derive(Debug, Clone, Default)]
pub struct FailureRecord {
    pub error_count: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub reason_counts: HashMap<FailureReasonKey, u32>,
    pub quarantined_until: Option<DateTime<Utc>>,
    pub last_reason: Option<FailureReason>,
}

/// `FailureReason` isn't `Eq+Hash`-derivable directly from outside the
/// crate boundary concerns here, but it already derives both; this alias
/// documents the map's key role.
pub type FailureReasonKey = FailureReason;

pub struct CooldownConfig {
    pub failure_window: chrono::Duration,
    pub error_threshold: u32,
    pub cooldown_duration: chrono::Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            failure_window: chrono::Duration::minutes(10),
            error_threshold: 3,
            cooldown_duration: chrono::Duration::minutes(5),
        }
    }
}

impl From<&crate::config::schema::CooldownSettings> for CooldownConfig {
    fn from(settings: &crate::config::schema::CooldownSettings) -> Self {
        Self {
            failure_window: chrono::Duration::seconds(settings.failure_window_secs),
            error_threshold: settings.error_threshold,
            cooldown_duration: chrono::Duration::seconds(settings.cooldown_duration_secs),
        }
    }
}

pub struct CooldownTracker {
    config: CooldownConfig,
    clock: Box<dyn Clock>,
    state: Mutex<HashMap<String, FailureRecord>>,
}

impl CooldownTracker {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            clock: Box::new(SystemClock),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(config: CooldownConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure. Resets the rolling window if it has expired;
    /// quarantines the provider once `error_threshold` is reached within
    /// the current window. Never quarantines on the very first failure of
    /// a category unless that single failure already meets the threshold
    /// (i.e. threshold=1) — the tracker only counts and gates, it does not
    /// decide retry policy.
    pub fn mark_failure(&self, provider: &str, reason: FailureReason) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let record = state.entry(provider.to_string()).or_default();

        let window_expired = match record.window_start {
            Some(start) => now - start > self.config.failure_window,
            None => true,
        };
        if window_expired {
            record.error_count = 0;
            record.reason_counts.clear();
            record.window_start = Some(now);
        }

        record.error_count += 1;
        *record.reason_counts.entry(reason).or_insert(0) += 1;
        record.last_reason = Some(reason);

        if record.error_count >= self.config.error_threshold {
            record.quarantined_until = Some(now + self.config.cooldown_duration);
            log::warn!("cooldown: provider '{provider}' quarantined until {:?}", record.quarantined_until);
        }
    }

    pub fn mark_success(&self, provider: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let record = state.entry(provider.to_string()).or_default();
        record.quarantined_until = None;
        record.error_count = 0;
        record.reason_counts.clear();
        record.window_start = None;
    }

    pub fn is_available(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.get(provider).and_then(|r| r.quarantined_until) {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Snapshot of a provider's current failure count (for tests/inspection).
    pub fn failures(&self, provider: &str) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.get(provider).map(|r| r.error_count).unwrap_or(0)
    }

    pub fn failures_for_reason(&self, provider: &str, reason: FailureReason) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .get(provider)
            .and_then(|r| r.reason_counts.get(&reason).copied())
            .unwrap_or(0)
    }

    /// The reason of the most recent recorded failure, used to annotate
    /// skipped attempts when a provider is already in cooldown.
    pub fn last_reason(&self, provider: &str) -> Option<FailureReason> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.get(provider).and_then(|r| r.last_reason)
    }
}
