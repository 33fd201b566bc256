// CHAIN OBSERVATIONS
// Values returned by the chain client, independent of the wire protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest block reported by the API node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadBlock {
    pub height: u64,

    /// Hex block id, used as the reference block of transactions
    pub id: String,

    pub timestamp: DateTime<Utc>,
}

impl HeadBlock {
    /// Seconds between the head block and `now`, never negative.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.timestamp).num_seconds().max(0) as u64
    }
}

/// On-chain record of the monitored witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInfo {
    pub witness_id: String,

    /// Account owning the witness, also the feed publisher
    pub witness_account: String,

    pub active_signing_key: String,

    /// Lifetime missed slots as counted by the chain's own scheduler
    pub total_missed: u64,

    pub total_votes: u64,

    /// Whether the witness is part of the active schedule
    pub is_active: bool,
}
