//! Shared vocabulary of the witness sentinel: the validated configuration,
//! chain observations, the error taxonomy, the event channel and the
//! statistics snapshot handed to front ends.

pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod stats;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{describe_feeds, ConfigUpdate, FeedThresholds, SettingsView, SigningSecret, WitnessConfig};
pub use errors::{ChainError, ConfigError, TransactionFailure, ValidationReport};
pub use events::{EventEmitter, MonitorEvent};
pub use stats::{FeedStatus, RunMode, StatisticsSnapshot};
pub use types::{HeadBlock, WitnessInfo};
