// WITNESS CONFIGURATION
// Typed, validated configuration value owned by the monitoring engine
//
// SAFETY INVARIANTS:
// 1. The private key is never serialized, logged or echoed
// 2. Every live edit is validated as a whole before it replaces the current value
// 3. A rejected edit leaves the previous configuration untouched

use crate::errors::{ConfigError, ValidationReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Prefix for environment overrides, e.g. `SENTINEL_PRIVATE_KEY`.
pub const ENV_PREFIX: &str = "SENTINEL";

/// Asset symbol -> staleness threshold in minutes.
pub type FeedThresholds = BTreeMap<String, u64>;

/// Private key authorizing rotation transactions (WIF encoded).
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        SigningSecret(secret.into())
    }

    /// Only the transaction signer should ever call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

impl fmt::Display for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WitnessConfig {
    /// Witness object being monitored (`1.6.<n>`)
    pub witness_id: String,

    /// API node endpoint (`ws://` or `wss://`)
    pub api_node: String,

    /// Key authorizing the witness_update transaction
    pub private_key: SigningSecret,

    /// Candidate public signing keys, rotated cyclically
    pub witness_signing_keys: Vec<String>,

    /// Missed blocks inside the window that trigger a rotation
    pub missed_block_threshold: u64,

    /// Seconds between block/connection checks
    pub checking_interval: u64,

    /// Seconds before the missed-block window resets
    pub reset_period: u64,

    /// Consecutive failures before the degraded notification
    pub retries_threshold: u32,

    /// Head-block age (seconds) that counts as desynchronized
    pub stale_blockchain_threshold: u64,

    #[serde(default)]
    pub feeds_to_check: FeedThresholds,

    /// Minutes between feed checks
    pub feed_checking_interval: u64,

    /// Minutes between statistics recaps, 0 disables them
    pub recap_time: u64,

    #[serde(default = "default_key_prefixes")]
    pub key_prefixes: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Asset the rotation fee is paid in
    #[serde(default = "default_core_asset")]
    pub core_asset: String,
}

fn default_key_prefixes() -> Vec<String> {
    vec!["TUSC".to_string(), "TEST".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_core_asset() -> String {
    "1.3.0".to_string()
}

/// A single live configuration edit issued by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    SigningKeys(Vec<String>),
    ApiNode(String),
    MissedBlockThreshold(u64),
    CheckingInterval(u64),
    ResetPeriod(u64),
    RecapTime(u64),
    RetriesThreshold(u32),
    FeedCheckingInterval(u64),
    FeedsToCheck(FeedThresholds),
}

impl ConfigUpdate {
    /// Edits that invalidate the feed records.
    pub fn resets_feed_check(&self) -> bool {
        matches!(self, ConfigUpdate::FeedCheckingInterval(_) | ConfigUpdate::FeedsToCheck(_))
    }
}

impl WitnessConfig {
    /// Load from a JSON/YAML/TOML file layered with `SENTINEL_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("witness_signing_keys")
                    .with_list_parse_key("key_prefixes"),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_source(source)
    }

    /// Parse an in-memory JSON document (no environment layering).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_source(source)
    }

    fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        let mut parsed: WitnessConfig = source
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        // Graphene asset symbols are upper case; the loader may fold map keys.
        parsed.feeds_to_check = normalize_feeds(std::mem::take(&mut parsed.feeds_to_check));
        Ok(parsed)
    }

    /// Collect every problem with the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut report = ValidationReport::new();
        let mut fail = |field: &str, msg: String| {
            report.entry(field.to_string()).or_default().push(msg);
        };

        if !is_witness_id(&self.witness_id) {
            fail("witness_id", format!("'{}' must look like 1.6.<n>", self.witness_id));
        }
        if let Err(msg) = check_api_node(&self.api_node) {
            fail("api_node", msg);
        }
        if self.private_key.is_empty() {
            fail("private_key", "must not be empty".to_string());
        }

        for (field, value) in [
            ("missed_block_threshold", self.missed_block_threshold),
            ("checking_interval", self.checking_interval),
            ("reset_period", self.reset_period),
            ("retries_threshold", u64::from(self.retries_threshold)),
            ("stale_blockchain_threshold", self.stale_blockchain_threshold),
            ("feed_checking_interval", self.feed_checking_interval),
        ] {
            if value == 0 {
                fail(field, "must be greater than 0".to_string());
            }
        }

        if self.witness_signing_keys.len() < 2 {
            fail("witness_signing_keys", "at least two signing keys are required".to_string());
        }
        for key in &self.witness_signing_keys {
            if !self.key_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
                fail(
                    "witness_signing_keys",
                    format!("'{}' does not start with one of {:?}", key, self.key_prefixes),
                );
            }
        }

        for (asset, threshold) in &self.feeds_to_check {
            if asset.trim().is_empty() {
                fail("feeds_to_check", "asset symbol must not be empty".to_string());
            }
            if *threshold == 0 {
                fail("feeds_to_check", format!("threshold for {} must be greater than 0", asset));
            }
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(report))
        }
    }

    /// Validate `update` against a copy, then swap it in.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        match update {
            ConfigUpdate::SigningKeys(keys) => candidate.witness_signing_keys = keys,
            ConfigUpdate::ApiNode(node) => candidate.api_node = node,
            ConfigUpdate::MissedBlockThreshold(n) => candidate.missed_block_threshold = n,
            ConfigUpdate::CheckingInterval(n) => candidate.checking_interval = n,
            ConfigUpdate::ResetPeriod(n) => candidate.reset_period = n,
            ConfigUpdate::RecapTime(n) => candidate.recap_time = n,
            ConfigUpdate::RetriesThreshold(n) => candidate.retries_threshold = n,
            ConfigUpdate::FeedCheckingInterval(n) => candidate.feed_checking_interval = n,
            ConfigUpdate::FeedsToCheck(feeds) => candidate.feeds_to_check = normalize_feeds(feeds),
        }
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn settings(&self) -> SettingsView {
        SettingsView {
            api_node: self.api_node.clone(),
            witness_id: self.witness_id.clone(),
            checking_interval: self.checking_interval,
            retries_threshold: self.retries_threshold,
            stale_blockchain_threshold: self.stale_blockchain_threshold,
            missed_block_threshold: self.missed_block_threshold,
            reset_period: self.reset_period,
            witness_signing_keys: self.witness_signing_keys.clone(),
            recap_time: self.recap_time,
            feeds_to_check: self.feeds_to_check.clone(),
            feed_checking_interval: self.feed_checking_interval,
        }
    }
}

fn normalize_feeds(feeds: FeedThresholds) -> FeedThresholds {
    feeds
        .into_iter()
        .map(|(asset, threshold)| (asset.trim().to_uppercase(), threshold))
        .collect()
}

fn is_witness_id(id: &str) -> bool {
    match id.strip_prefix("1.6.") {
        Some(instance) => !instance.is_empty() && instance.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn check_api_node(node: &str) -> Result<(), String> {
    let host = node
        .strip_prefix("wss://")
        .or_else(|| node.strip_prefix("ws://"))
        .ok_or_else(|| format!("'{}' must use ws:// or wss://", node))?;
    if host.trim().is_empty() {
        return Err(format!("'{}' has no host", node));
    }
    Ok(())
}

/// Read-only view of the configuration, safe to display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettingsView {
    pub api_node: String,
    pub witness_id: String,
    pub checking_interval: u64,
    pub retries_threshold: u32,
    pub stale_blockchain_threshold: u64,
    pub missed_block_threshold: u64,
    pub reset_period: u64,
    pub witness_signing_keys: Vec<String>,
    pub recap_time: u64,
    pub feeds_to_check: FeedThresholds,
    pub feed_checking_interval: u64,
}

pub fn describe_feeds(feeds: &FeedThresholds) -> String {
    feeds
        .iter()
        .map(|(asset, minutes)| format!("{} ({} min)", asset, minutes))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for SettingsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "API node: {}", self.api_node)?;
        writeln!(f, "Witness monitored: {}", self.witness_id)?;
        writeln!(f, "Checking interval: {} sec", self.checking_interval)?;
        writeln!(f, "Failed connection notification threshold: {}", self.retries_threshold)?;
        writeln!(f, "Desynchronization threshold: {} sec", self.stale_blockchain_threshold)?;
        writeln!(f, "Missed block threshold: {}", self.missed_block_threshold)?;
        writeln!(f, "Missed block reset time window: {} sec", self.reset_period)?;
        writeln!(f, "Public signing keys: {}", self.witness_signing_keys.join(", "))?;
        writeln!(f, "Recap time period: {} min", self.recap_time)?;
        writeln!(f, "Feeds to check: {}", describe_feeds(&self.feeds_to_check))?;
        write!(f, "Feed check interval: {} min", self.feed_checking_interval)
    }
}
