// OPERATOR CONSOLE
// Line commands for a running sentinel and the statistics recap cadence
//
// SAFETY INVARIANTS:
// 1. A command either applies completely or is rejected with a reason
// 2. Replies never include the private key
// 3. Recaps are driven by `checked` events, never by a timer of their own

use chrono::{DateTime, Utc};
use sentinel_core::{describe_feeds, ConfigUpdate, FeedThresholds};
use sentinel_monitor::{RotationOutcome, WitnessMonitor};
use thiserror::Error;

pub const HELP: &str = "\
/stats [json]: current statistics of the monitoring session
/settings: current configuration
/switch: IMMEDIATELY update the signing key to the next available one
/signing_keys <key1> <key2> ...: set a new list of public signing keys
/new_node wss://<api_node_url>: set a new API node to connect to
/threshold X: missed blocks in the window before the signing key is updated
/interval Y: check the witness every Y seconds
/window Z: reset the missed block counter every Z seconds
/recap T: print the statistics every T minutes, 0 disables it
/retries N: failed checks before a connection warning
/feed_checking_interval I: check price feeds every I minutes
/feeds <symbol1>:<minutes1> <symbol2>:<minutes2> ...: feeds to watch and their thresholds
/reset: reset the missed block counter of the current window
/reset_feeds: forget feed publication history
/pause: pause monitoring
/resume: resume monitoring
/help: this text";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Commands start with '/', type /help for the list")]
    NotACommand,

    #[error("Unknown command /{0}, type /help for the list")]
    Unknown(String),

    #[error("/{0} needs an argument")]
    MissingArgument(String),

    #[error("/{command}: '{value}' is not a valid number")]
    InvalidNumber { command: String, value: String },

    #[error("/feeds: '{0}' must look like SYMBOL:minutes")]
    InvalidFeed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Stats { json: bool },
    Settings,
    Switch,
    SigningKeys(Vec<String>),
    NewNode(String),
    Threshold(u64),
    Interval(u64),
    Window(u64),
    Recap(u64),
    Retries(u32),
    FeedCheckingInterval(u64),
    Feeds(FeedThresholds),
    Reset,
    ResetFeeds,
    Pause,
    Resume,
    Help,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let body = line.trim().strip_prefix('/').ok_or(CommandError::NotACommand)?;
        let mut words = body.split_whitespace();
        let name = words.next().unwrap_or_default().to_string();
        let args: Vec<&str> = words.collect();

        let command = match name.as_str() {
            "stats" => OperatorCommand::Stats {
                json: args.first() == Some(&"json"),
            },
            "settings" => OperatorCommand::Settings,
            "switch" => OperatorCommand::Switch,
            "signing_keys" => {
                require(&name, &args)?;
                OperatorCommand::SigningKeys(args.iter().map(|k| k.to_string()).collect())
            }
            "new_node" => {
                require(&name, &args)?;
                OperatorCommand::NewNode(args[0].to_string())
            }
            "threshold" => OperatorCommand::Threshold(number(&name, &args)?),
            "interval" => OperatorCommand::Interval(number(&name, &args)?),
            "window" => OperatorCommand::Window(number(&name, &args)?),
            "recap" => OperatorCommand::Recap(number(&name, &args)?),
            "retries" => OperatorCommand::Retries(number(&name, &args)?),
            "feed_checking_interval" => OperatorCommand::FeedCheckingInterval(number(&name, &args)?),
            "feeds" => {
                require(&name, &args)?;
                OperatorCommand::Feeds(parse_feeds(&args)?)
            }
            "reset" => OperatorCommand::Reset,
            "reset_feeds" => OperatorCommand::ResetFeeds,
            "pause" => OperatorCommand::Pause,
            "resume" => OperatorCommand::Resume,
            "help" | "start" => OperatorCommand::Help,
            _ => return Err(CommandError::Unknown(name)),
        };
        Ok(command)
    }

    /// The configuration edit this command stands for, if it is one.
    pub fn config_update(&self) -> Option<ConfigUpdate> {
        let update = match self {
            OperatorCommand::SigningKeys(keys) => ConfigUpdate::SigningKeys(keys.clone()),
            OperatorCommand::NewNode(node) => ConfigUpdate::ApiNode(node.clone()),
            OperatorCommand::Threshold(n) => ConfigUpdate::MissedBlockThreshold(*n),
            OperatorCommand::Interval(n) => ConfigUpdate::CheckingInterval(*n),
            OperatorCommand::Window(n) => ConfigUpdate::ResetPeriod(*n),
            OperatorCommand::Recap(n) => ConfigUpdate::RecapTime(*n),
            OperatorCommand::Retries(n) => ConfigUpdate::RetriesThreshold(*n),
            OperatorCommand::FeedCheckingInterval(n) => ConfigUpdate::FeedCheckingInterval(*n),
            OperatorCommand::Feeds(feeds) => ConfigUpdate::FeedsToCheck(feeds.clone()),
            _ => return None,
        };
        Some(update)
    }
}

fn require(command: &str, args: &[&str]) -> Result<(), CommandError> {
    if args.is_empty() {
        Err(CommandError::MissingArgument(command.to_string()))
    } else {
        Ok(())
    }
}

fn number<T: std::str::FromStr>(command: &str, args: &[&str]) -> Result<T, CommandError> {
    require(command, args)?;
    args[0].parse().map_err(|_| CommandError::InvalidNumber {
        command: command.to_string(),
        value: args[0].to_string(),
    })
}

fn parse_feeds(args: &[&str]) -> Result<FeedThresholds, CommandError> {
    args.iter()
        .map(|entry| {
            let (symbol, minutes) = entry
                .split_once(':')
                .ok_or_else(|| CommandError::InvalidFeed(entry.to_string()))?;
            let minutes = minutes
                .parse::<u64>()
                .map_err(|_| CommandError::InvalidFeed(entry.to_string()))?;
            if symbol.is_empty() {
                return Err(CommandError::InvalidFeed(entry.to_string()));
            }
            Ok((symbol.to_string(), minutes))
        })
        .collect()
}

/// Run one command against the monitor and return the reply for the operator.
pub async fn execute(monitor: &WitnessMonitor, command: OperatorCommand) -> String {
    if let Some(update) = command.config_update() {
        if let Err(e) = monitor.update_config(update) {
            return format!("Rejected: {}", e);
        }
        return confirm_update(monitor, &command);
    }

    match command {
        OperatorCommand::Stats { json: false } => monitor.current_statistics().to_string(),
        OperatorCommand::Stats { json: true } => serde_json::to_string_pretty(&monitor.current_statistics())
            .unwrap_or_else(|e| format!("Unable to render statistics: {}", e)),
        OperatorCommand::Settings => monitor.settings().to_string(),
        OperatorCommand::Switch => match monitor.force_update_signing_key().await {
            RotationOutcome::Rotated { key, .. } => format!("Signing key updated to {}", key),
            RotationOutcome::Failed { key, reason } => format!("Signing key update to {} failed: {}", key, reason),
            RotationOutcome::Unavailable => "Only one signing key is configured, nothing to switch to.".to_string(),
            RotationOutcome::AlreadyInProgress => "A signing key update is already in progress.".to_string(),
        },
        OperatorCommand::Reset => {
            monitor.reset_missed_block_window();
            "Session missed block counter set to 0.".to_string()
        }
        OperatorCommand::ResetFeeds => {
            monitor.reset_feed_check();
            "Feed publication history cleared.".to_string()
        }
        OperatorCommand::Pause => {
            monitor.pause();
            "Witness monitoring paused. Use /resume to resume monitoring.".to_string()
        }
        OperatorCommand::Resume => {
            monitor.resume();
            "Witness monitoring resumed.".to_string()
        }
        OperatorCommand::Help => HELP.to_string(),
        // Configuration edits were handled above.
        _ => String::new(),
    }
}

fn confirm_update(monitor: &WitnessMonitor, command: &OperatorCommand) -> String {
    let settings = monitor.settings();
    match command {
        OperatorCommand::SigningKeys(_) => {
            format!("Signing keys set to: {}", settings.witness_signing_keys.join(", "))
        }
        OperatorCommand::NewNode(_) => format!("API node set to: {}", settings.api_node),
        OperatorCommand::Threshold(_) => {
            format!("Missed block threshold set to: {}", settings.missed_block_threshold)
        }
        OperatorCommand::Interval(_) => format!("Checking interval set to: {}s.", settings.checking_interval),
        OperatorCommand::Window(_) => {
            format!("Missed block reset time window set to: {}s", settings.reset_period)
        }
        OperatorCommand::Recap(0) => "Recap disabled.".to_string(),
        OperatorCommand::Recap(_) => format!("Recap time period set to: {} minutes.", settings.recap_time),
        OperatorCommand::Retries(_) => format!(
            "Failed node connection attempt notification threshold set to: {}",
            settings.retries_threshold
        ),
        OperatorCommand::FeedCheckingInterval(_) => {
            format!("Feed checking interval set to: {}m.", settings.feed_checking_interval)
        }
        OperatorCommand::Feeds(_) => format!("Feeds to check set to: {}.", describe_feeds(&settings.feeds_to_check)),
        _ => String::new(),
    }
}

/// Decides when a `checked` event should be followed by a statistics recap.
#[derive(Debug, Clone)]
pub struct RecapTracker {
    last_sent: DateTime<Utc>,
}

impl RecapTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        RecapTracker { last_sent: now }
    }

    /// True (and the clock restarts) when `recap_minutes` elapsed; 0 disables recaps.
    pub fn due(&mut self, now: DateTime<Utc>, recap_minutes: u64) -> bool {
        if recap_minutes == 0 {
            return false;
        }
        let recap_minutes = i64::try_from(recap_minutes).unwrap_or(i64::MAX);
        if now.signed_duration_since(self.last_sent).num_minutes() >= recap_minutes {
            self.last_sent = now;
            true
        } else {
            false
        }
    }
}
