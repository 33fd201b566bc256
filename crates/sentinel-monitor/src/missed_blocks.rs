// MISSED BLOCK WINDOW
// Counts missed slots per time window from the chain's lifetime counter
//
// SAFETY INVARIANTS:
// 1. window_missed <= total_missed at all times
// 2. The window resets only on elapsed reset period or explicit reset
// 3. The first observation is a baseline and never counts as missed
// 4. A chain counter that goes backwards re-baselines without counting

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct MissedBlockTracker {
    /// Missed slots observed since the monitor started
    total_missed: u64,

    /// Missed slots observed since `window_start`
    window_missed: u64,

    window_start: DateTime<Utc>,

    /// Chain's lifetime counter at the previous observation
    last_chain_total: Option<u64>,
}

impl MissedBlockTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        MissedBlockTracker {
            total_missed: 0,
            window_missed: 0,
            window_start: now,
            last_chain_total: None,
        }
    }

    pub fn total_missed(&self) -> u64 {
        self.total_missed
    }

    pub fn window_missed(&self) -> u64 {
        self.window_missed
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Close the window if more than `reset_period_secs` elapsed since it opened.
    pub fn expire_window(&mut self, now: DateTime<Utc>, reset_period_secs: u64) -> bool {
        let elapsed = now.signed_duration_since(self.window_start).num_seconds();
        if elapsed > i64::try_from(reset_period_secs).unwrap_or(i64::MAX) {
            self.reset_window(now);
            true
        } else {
            false
        }
    }

    pub fn reset_window(&mut self, now: DateTime<Utc>) {
        self.window_missed = 0;
        self.window_start = now;
    }

    /// Record the chain's lifetime missed counter, returning newly missed slots.
    pub fn observe(&mut self, chain_total_missed: u64) -> u64 {
        let newly = match self.last_chain_total {
            Some(previous) if chain_total_missed > previous => chain_total_missed - previous,
            _ => 0,
        };
        self.last_chain_total = Some(chain_total_missed);
        self.total_missed += newly;
        self.window_missed += newly;
        newly
    }
}
