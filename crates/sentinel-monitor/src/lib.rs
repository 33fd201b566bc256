//! Monitoring engine of the witness sentinel.
//!
//! [`WitnessMonitor`] owns the shared state; the [`scheduler`] drives its two
//! polls and operator commands call into it directly. Everything the engine
//! has to say leaves through the event channel returned by
//! [`WitnessMonitor::subscribe`].

pub mod engine;
pub mod feeds;
pub mod guard;
pub mod health;
pub mod missed_blocks;
pub mod rotation;
pub mod scheduler;

pub use engine::{CheckReport, FeedCheckReport, WitnessMonitor};
pub use feeds::{FeedMonitor, FeedRecord, FeedVerdict};
pub use health::{backoff_delay, ConnectionHealth, HealthTransition, PollOutcome};
pub use missed_blocks::MissedBlockTracker;
pub use rotation::{RotationController, RotationOutcome, RotationPhase, RotationTrigger};
pub use scheduler::{Scheduler, SchedulerHandle};
