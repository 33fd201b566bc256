// CONNECTION HEALTH
// Consecutive-failure counter with edge-triggered escalation
//
// SAFETY INVARIANTS:
// 1. Any successful poll resets the counter to zero
// 2. "Degraded" fires once, on the poll where the counter first reaches the threshold
// 3. "Recovered" fires once, on the first successful poll after an escalation
// 4. Reconnect delay is bounded by half the checking interval (at least one second)

use chrono::{DateTime, Utc};
use sentinel_core::HeadBlock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caps the exponent so the shift below can never overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Classification of one check-interval poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollOutcome {
    Ok,
    /// The node could not be reached or answered garbage
    ConnectionFailure,
    /// The node answered but its head block is too old
    Desync,
}

impl PollOutcome {
    /// Desync when the head block is older than `stale_threshold_secs`.
    pub fn classify(head: &HeadBlock, now: DateTime<Utc>, stale_threshold_secs: u64) -> Self {
        if head.age_seconds(now) > stale_threshold_secs {
            PollOutcome::Desync
        } else {
            PollOutcome::Ok
        }
    }

    pub fn is_failure(self) -> bool {
        self != PollOutcome::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Degraded { failures: u32, cause: PollOutcome },
    Recovered { after_failures: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    consecutive_failures: u32,
    escalated: bool,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    /// Fold one poll outcome in, returning the edge to notify about, if any.
    ///
    /// The threshold is read per call so a live edit applies to the next poll.
    pub fn record(&mut self, outcome: PollOutcome, retries_threshold: u32) -> Option<HealthTransition> {
        if !outcome.is_failure() {
            let after_failures = self.consecutive_failures;
            let was_escalated = self.escalated;
            self.consecutive_failures = 0;
            self.escalated = false;
            return was_escalated.then_some(HealthTransition::Recovered { after_failures });
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.escalated && self.consecutive_failures >= retries_threshold.max(1) {
            self.escalated = true;
            return Some(HealthTransition::Degraded {
                failures: self.consecutive_failures,
                cause: outcome,
            });
        }
        None
    }

    /// Delay before the next reconnect attempt.
    pub fn reconnect_delay(&self, checking_interval_secs: u64) -> Duration {
        backoff_delay(self.consecutive_failures, checking_interval_secs)
    }
}

/// `min(2^(failures-1) s, max(1 s, checking_interval / 2))`, zero before any failure.
pub fn backoff_delay(failures: u32, checking_interval_secs: u64) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponential = 1u64 << (failures - 1).min(MAX_BACKOFF_EXPONENT);
    let ceiling = (checking_interval_secs / 2).max(1);
    Duration::from_secs(exponential.min(ceiling))
}
