// FEED STALENESS
// Per-asset publication tracking with one alert per stale episode
//
// SAFETY INVARIANTS:
// 1. A feed never published counts as stale
// 2. stale_notified is set on the first stale observation and cleared only by a fresh one
// 3. Records are rebuilt wholesale from configuration, never patched
// 4. Observations planned before a rebuild are discarded

use chrono::{DateTime, Utc};
use sentinel_core::{FeedStatus, FeedThresholds};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    pub asset: String,
    pub threshold_minutes: u64,
    pub last_publication: Option<DateTime<Utc>>,
    pub stale_notified: bool,

    /// Lookup failure already reported for this record
    pub error_notified: bool,
}

impl FeedRecord {
    fn new(asset: &str, threshold_minutes: u64) -> Self {
        FeedRecord {
            asset: asset.to_string(),
            threshold_minutes,
            last_publication: None,
            stale_notified: false,
            error_notified: false,
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_publication
            .map(|at| now.signed_duration_since(at).num_minutes())
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_publication {
            Some(at) => {
                let threshold_secs =
                    i64::try_from(self.threshold_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
                now.signed_duration_since(at).num_seconds() > threshold_secs
            }
            None => true,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> FeedStatus {
        FeedStatus {
            asset: self.asset.clone(),
            threshold_minutes: self.threshold_minutes,
            last_publication: self.last_publication,
            age_minutes: self.age_minutes(now),
            stale_notified: self.stale_notified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedVerdict {
    Fresh,
    /// First stale observation of this episode, alert the operator
    BecameStale,
    StillStale,
    /// Fresh again after an alert
    Recovered,
}

/// Assets to query in one feed poll, tagged with the record generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPlan {
    pub generation: u64,
    pub assets: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FeedMonitor {
    records: BTreeMap<String, FeedRecord>,
    generation: u64,
}

impl FeedMonitor {
    pub fn from_config(feeds: &FeedThresholds) -> Self {
        let mut monitor = FeedMonitor::default();
        monitor.rebuild(feeds);
        monitor
    }

    /// Discard every record and start over from `feeds`.
    pub fn rebuild(&mut self, feeds: &FeedThresholds) {
        self.generation += 1;
        self.records = feeds
            .iter()
            .map(|(asset, threshold)| (asset.clone(), FeedRecord::new(asset, *threshold)))
            .collect();
    }

    pub fn plan(&self) -> FeedPlan {
        FeedPlan {
            generation: self.generation,
            assets: self.records.keys().cloned().collect(),
        }
    }

    pub fn record(&self, asset: &str) -> Option<&FeedRecord> {
        self.records.get(asset)
    }

    /// Fold in the latest publication time; None when the plan is outdated.
    pub fn observe(
        &mut self,
        generation: u64,
        asset: &str,
        publication: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<FeedVerdict> {
        if generation != self.generation {
            return None;
        }
        let record = self.records.get_mut(asset)?;
        record.last_publication = publication;
        record.error_notified = false;

        let verdict = match (record.is_stale(now), record.stale_notified) {
            (true, false) => {
                record.stale_notified = true;
                FeedVerdict::BecameStale
            }
            (true, true) => FeedVerdict::StillStale,
            (false, true) => {
                record.stale_notified = false;
                FeedVerdict::Recovered
            }
            (false, false) => FeedVerdict::Fresh,
        };
        Some(verdict)
    }

    /// Mark a lookup failure, true when it has not been reported yet.
    pub fn observe_error(&mut self, generation: u64, asset: &str) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.records.get_mut(asset) {
            Some(record) if !record.error_notified => {
                record.error_notified = true;
                true
            }
            _ => false,
        }
    }

    pub fn statuses(&self, now: DateTime<Utc>) -> Vec<FeedStatus> {
        self.records.values().map(|r| r.status(now)).collect()
    }
}
