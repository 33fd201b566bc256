// STATISTICS SNAPSHOT
// Immutable, derived view of the monitor; recomputed on every request

use crate::types::HeadBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Running,
    Paused,
}

/// Human-readable status of one watched price feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub asset: String,
    pub threshold_minutes: u64,
    pub last_publication: Option<DateTime<Utc>>,
    /// Minutes since the last publication at snapshot time
    pub age_minutes: Option<i64>,
    pub stale_notified: bool,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.last_publication, self.age_minutes) {
            (Some(at), Some(age)) => write!(
                f,
                "{}: last published {} ({} min ago, threshold {} min)",
                self.asset,
                at.format("%Y-%m-%d %H:%M:%S UTC"),
                age,
                self.threshold_minutes
            ),
            _ => write!(
                f,
                "{}: no publication seen yet (threshold {} min)",
                self.asset, self.threshold_minutes
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_missed: u64,
    pub window_missed: u64,

    /// From the last witness info fetched, None before the first successful poll
    pub total_votes: Option<u64>,
    pub is_activated: Option<bool>,

    pub signing_key: String,
    pub rotation_in_progress: bool,
    pub run_mode: RunMode,
    pub consecutive_failures: u32,
    pub last_head_block: Option<HeadBlock>,
    pub feed_publications: Vec<FeedStatus>,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total missed blocks: {}", self.total_missed)?;
        writeln!(f, "Missed blocks in current time window: {}", self.window_missed)?;
        match (self.total_votes, self.is_activated) {
            (Some(votes), Some(active)) => writeln!(
                f,
                "Total votes: {} ({})",
                votes,
                if active { "active" } else { "inactive" }
            )?,
            _ => writeln!(f, "Total votes: unknown")?,
        }
        write!(f, "Current signing key: {}", self.signing_key)?;
        if self.rotation_in_progress {
            write!(f, " (rotation in progress)")?;
        }
        writeln!(f)?;
        if self.run_mode == RunMode::Paused {
            writeln!(f, "Monitoring is paused")?;
        }
        write!(f, "Feed publications:")?;
        for feed in &self.feed_publications {
            write!(f, "\n  - {}", feed)?;
        }
        Ok(())
    }
}
