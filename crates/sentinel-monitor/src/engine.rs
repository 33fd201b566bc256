// MONITOR ENGINE
// Shared state behind the scheduler ticks and the operator commands
//
// SAFETY INVARIANTS:
// 1. A poll kind never overlaps with itself: a tick finding its gate busy is skipped
// 2. Each poll works on the configuration snapshot taken when it started
// 3. No state lock is held across an await
// 4. Locks are taken in the order config -> state -> feeds, never the reverse
// 5. Every completed check-interval poll emits `checked`, whatever its outcome
// 6. 0 <= signing_key_index < len(witness_signing_keys)

use crate::feeds::{FeedMonitor, FeedVerdict};
use crate::guard::InFlightGuard;
use crate::health::{ConnectionHealth, HealthTransition, PollOutcome};
use crate::missed_blocks::MissedBlockTracker;
use crate::rotation::{next_key_index, RotationController, RotationOutcome, RotationTrigger, ROTATION_ATTEMPTS};
use crate::scheduler::{Scheduler, SchedulerHandle};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use sentinel_chain::ChainClient;
use sentinel_core::{
    ChainError, Clock, ConfigError, ConfigUpdate, EventEmitter, HeadBlock, MonitorEvent, RunMode,
    SettingsView, StatisticsSnapshot, SystemClock, WitnessConfig, WitnessInfo,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// What a check-interval poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckReport {
    /// The previous check was still running
    Skipped,
    Paused,
    ConnectionFailure,
    Desync,
    Completed {
        newly_missed: u64,
        window_missed: u64,
        rotation: Option<RotationOutcome>,
    },
}

/// What a feed-interval poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCheckReport {
    Skipped,
    Paused,
    /// No session, or the publisher account could not be resolved
    Unreachable,
    Completed { checked: usize, newly_stale: Vec<String> },
}

#[derive(Debug)]
struct MonitorState {
    run_mode: RunMode,
    missed: MissedBlockTracker,
    health: ConnectionHealth,
    signing_key_index: usize,

    /// Align signing_key_index with the chain on the next successful poll
    resync_key_index: bool,

    /// Threshold rotation already reported as unavailable for this window
    rotation_muted: bool,

    last_head: Option<HeadBlock>,
    last_witness: Option<WitnessInfo>,
}

impl MonitorState {
    fn new(now: DateTime<Utc>) -> Self {
        MonitorState {
            run_mode: RunMode::Running,
            missed: MissedBlockTracker::new(now),
            health: ConnectionHealth::new(),
            signing_key_index: 0,
            resync_key_index: true,
            rotation_muted: false,
            last_head: None,
            last_witness: None,
        }
    }

    fn sync_key_index(&mut self, keys: &[String], active_key: &str) {
        match keys.iter().position(|k| k == active_key) {
            Some(index) => self.signing_key_index = index,
            None => {
                warn!("Active signing key {} is not among the configured signing keys", active_key);
                self.signing_key_index = self.signing_key_index.min(keys.len().saturating_sub(1));
            }
        }
        self.resync_key_index = false;
    }
}

struct Inner {
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    config: RwLock<WitnessConfig>,
    state: Mutex<MonitorState>,
    feeds: Mutex<FeedMonitor>,
    rotation: RotationController,
    events: EventEmitter,
    check_gate: InFlightGuard,
    feed_gate: InFlightGuard,

    /// Serializes reconnects between the two poll kinds
    connecting: tokio::sync::Mutex<()>,
}

/// Cloneable handle on the monitoring engine.
#[derive(Clone)]
pub struct WitnessMonitor {
    inner: Arc<Inner>,
}

impl WitnessMonitor {
    /// `config` is expected to have passed `WitnessConfig::validate`.
    pub fn new(config: WitnessConfig, chain: Arc<dyn ChainClient>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let feeds = FeedMonitor::from_config(&config.feeds_to_check);
        WitnessMonitor {
            inner: Arc::new(Inner {
                chain,
                clock,
                config: RwLock::new(config),
                state: Mutex::new(MonitorState::new(now)),
                feeds: Mutex::new(feeds),
                rotation: RotationController::new(),
                events: EventEmitter::new(),
                check_gate: InFlightGuard::new(),
                feed_gate: InFlightGuard::new(),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn with_system_clock(config: WitnessConfig, chain: Arc<dyn ChainClient>) -> Self {
        Self::new(config, chain, Arc::new(SystemClock))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the two poll timers. The first check runs immediately.
    pub fn start_monitoring(&self) -> SchedulerHandle {
        Scheduler::new(self.clone()).start()
    }

    /// Snapshot of the live configuration.
    pub fn config(&self) -> WitnessConfig {
        self.inner.config.read().clone()
    }

    pub fn settings(&self) -> SettingsView {
        self.inner.config.read().settings()
    }

    pub fn run_mode(&self) -> RunMode {
        self.inner.state.lock().run_mode
    }

    pub fn pause(&self) {
        self.inner.state.lock().run_mode = RunMode::Paused;
        info!("Monitoring paused");
    }

    pub fn resume(&self) {
        self.inner.state.lock().run_mode = RunMode::Running;
        info!("Monitoring resumed");
    }

    pub fn reset_missed_block_window(&self) {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.missed.reset_window(now);
        state.rotation_muted = false;
        info!("Missed block window reset");
    }

    pub fn reset_feed_check(&self) {
        let config = self.inner.config.read();
        self.inner.feeds.lock().rebuild(&config.feeds_to_check);
        info!("Feed check reset: {}", sentinel_core::describe_feeds(&config.feeds_to_check));
    }

    /// Validate and apply one live edit. Polls pick it up from their next tick.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let resets_feeds = update.resets_feed_check();
        let keys_changed = matches!(update, ConfigUpdate::SigningKeys(_));

        let mut config = self.inner.config.write();
        config.apply(update)?;

        if keys_changed {
            let mut state = self.inner.state.lock();
            let active = state.last_witness.as_ref().map(|w| w.active_signing_key.clone());
            match active {
                Some(key) => state.sync_key_index(&config.witness_signing_keys, &key),
                None => {
                    state.signing_key_index = state
                        .signing_key_index
                        .min(config.witness_signing_keys.len().saturating_sub(1));
                }
            }
            // Confirm against fresh chain data on the next poll.
            state.resync_key_index = true;
            state.rotation_muted = false;
        }
        if resets_feeds {
            self.inner.feeds.lock().rebuild(&config.feeds_to_check);
        }
        Ok(())
    }

    /// Composed on demand from the current state, no side effects.
    pub fn current_statistics(&self) -> StatisticsSnapshot {
        let inner = &self.inner;
        let now = inner.clock.now();
        let config = inner.config.read();
        let state = inner.state.lock();
        let feed_publications = inner.feeds.lock().statuses(now);

        StatisticsSnapshot {
            total_missed: state.missed.total_missed(),
            window_missed: state.missed.window_missed(),
            total_votes: state.last_witness.as_ref().map(|w| w.total_votes),
            is_activated: state.last_witness.as_ref().map(|w| w.is_active),
            signing_key: config
                .witness_signing_keys
                .get(state.signing_key_index)
                .cloned()
                .unwrap_or_default(),
            rotation_in_progress: inner.rotation.is_rotating(),
            run_mode: state.run_mode,
            consecutive_failures: state.health.consecutive_failures(),
            last_head_block: state.last_head.clone(),
            feed_publications,
        }
    }

    /// Rotate to the next signing key regardless of the missed-block count.
    pub async fn force_update_signing_key(&self) -> RotationOutcome {
        let config = self.config();
        self.rotate(RotationTrigger::Forced, &config).await
    }

    /// One check-interval poll: health, missed blocks, rotation.
    pub async fn check(&self) -> CheckReport {
        let Some(_permit) = self.inner.check_gate.try_enter() else {
            debug!("Previous check still running, tick skipped");
            return CheckReport::Skipped;
        };
        if self.run_mode() == RunMode::Paused {
            return CheckReport::Paused;
        }

        let config = self.config();
        let report = self.poll_witness(&config).await;
        self.inner.events.emit(MonitorEvent::Checked);
        report
    }

    /// One feed-interval poll over every watched asset.
    pub async fn check_feeds(&self) -> FeedCheckReport {
        let inner = &self.inner;
        let Some(_permit) = inner.feed_gate.try_enter() else {
            debug!("Previous feed check still running, tick skipped");
            return FeedCheckReport::Skipped;
        };
        if self.run_mode() == RunMode::Paused {
            return FeedCheckReport::Paused;
        }

        let config = self.config();
        let plan = inner.feeds.lock().plan();
        if plan.assets.is_empty() {
            return FeedCheckReport::Completed {
                checked: 0,
                newly_stale: Vec::new(),
            };
        }

        let publisher = match self.witness_for(&config).await {
            Ok(witness) => witness.witness_account,
            Err(e) => {
                warn!("Feed check skipped, witness {} unavailable: {}", config.witness_id, e);
                return FeedCheckReport::Unreachable;
            }
        };

        let mut checked = 0;
        let mut newly_stale = Vec::new();
        for asset in &plan.assets {
            let fetched = inner.chain.feed_timestamp(asset, &publisher).await;
            let now = inner.clock.now();
            match fetched {
                Ok(publication) => {
                    let observed = {
                        let mut feeds = inner.feeds.lock();
                        let verdict = feeds.observe(plan.generation, asset, publication, now);
                        verdict.map(|v| (v, feeds.record(asset).map(|r| r.threshold_minutes).unwrap_or_default()))
                    };
                    match observed {
                        Some((FeedVerdict::BecameStale, threshold)) => {
                            inner.events.notify(stale_feed_message(asset, &publisher, publication, threshold, now));
                            newly_stale.push(asset.clone());
                        }
                        Some((FeedVerdict::Recovered, _)) => info!("{} feed is being published again", asset),
                        Some(_) => {}
                        None => {
                            debug!("Feed records were reset during the poll, dropping remaining results");
                            break;
                        }
                    }
                    checked += 1;
                }
                Err(ChainError::NotFound(what)) => {
                    if inner.feeds.lock().observe_error(plan.generation, asset) {
                        inner.events.notify(format!("Unable to check {} feed: {} not found", asset, what));
                    }
                }
                Err(e) if e.is_transport() => {
                    warn!("Feed check interrupted at {}: {}", asset, e);
                    return FeedCheckReport::Unreachable;
                }
                Err(e) => warn!("Feed lookup for {} failed: {}", asset, e),
            }
        }

        FeedCheckReport::Completed { checked, newly_stale }
    }

    async fn poll_witness(&self, config: &WitnessConfig) -> CheckReport {
        let inner = &self.inner;
        let (head, witness) = match self.fetch_chain_view(config).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Check against {} failed: {}", config.api_node, e);
                let transition = inner
                    .state
                    .lock()
                    .health
                    .record(PollOutcome::ConnectionFailure, config.retries_threshold);
                self.announce(transition, config, &e.to_string());
                return CheckReport::ConnectionFailure;
            }
        };

        let now = inner.clock.now();
        if PollOutcome::classify(&head, now, config.stale_blockchain_threshold) == PollOutcome::Desync {
            let detail = format!(
                "head block #{} is {} s old (threshold {} s)",
                head.height,
                head.age_seconds(now),
                config.stale_blockchain_threshold
            );
            warn!("Blockchain looks desynchronized: {}", detail);
            let transition = {
                let mut state = inner.state.lock();
                state.last_head = Some(head);
                state.health.record(PollOutcome::Desync, config.retries_threshold)
            };
            self.announce(transition, config, &detail);
            return CheckReport::Desync;
        }

        let (transition, newly_missed, window_missed, total_missed, wants_rotation) = {
            let mut state = inner.state.lock();
            let transition = state.health.record(PollOutcome::Ok, config.retries_threshold);
            if state.resync_key_index {
                state.sync_key_index(&config.witness_signing_keys, &witness.active_signing_key);
            }
            if state.missed.expire_window(now, config.reset_period) {
                debug!("Missed block window expired after {} s", config.reset_period);
                state.rotation_muted = false;
            }
            let newly_missed = state.missed.observe(witness.total_missed);
            let window_missed = state.missed.window_missed();
            let wants_rotation = window_missed >= config.missed_block_threshold && !state.rotation_muted;
            state.last_head = Some(head);
            state.last_witness = Some(witness);
            (
                transition,
                newly_missed,
                window_missed,
                state.missed.total_missed(),
                wants_rotation,
            )
        };
        self.announce(transition, config, "");

        if newly_missed > 0 {
            inner.events.notify(format!(
                "Witness {} missed {} block(s): {} in the current window, {} since monitoring started",
                config.witness_id, newly_missed, window_missed, total_missed
            ));
        }

        let rotation = if wants_rotation {
            Some(self.rotate(RotationTrigger::MissedBlocks { window_missed }, config).await)
        } else {
            None
        };

        CheckReport::Completed {
            newly_missed,
            window_missed,
            rotation,
        }
    }

    async fn fetch_chain_view(&self, config: &WitnessConfig) -> Result<(HeadBlock, WitnessInfo), ChainError> {
        self.ensure_session(config).await?;
        let head = self.inner.chain.head_block().await?;
        let witness = self.inner.chain.witness_info(&config.witness_id).await?;
        Ok((head, witness))
    }

    /// Cached witness from the last check, fetched when there is none yet.
    async fn witness_for(&self, config: &WitnessConfig) -> Result<WitnessInfo, ChainError> {
        let cached = self.inner.state.lock().last_witness.clone();
        self.ensure_session(config).await?;
        match cached {
            Some(witness) => Ok(witness),
            None => self.inner.chain.witness_info(&config.witness_id).await,
        }
    }

    /// (Re)connect when there is no session or the configured node changed.
    async fn ensure_session(&self, config: &WitnessConfig) -> Result<(), ChainError> {
        let inner = &self.inner;
        let _connecting = inner.connecting.lock().await;
        if inner.chain.session_endpoint().as_deref() == Some(config.api_node.as_str()) {
            return Ok(());
        }

        let delay = inner.state.lock().health.reconnect_delay(config.checking_interval);
        if !delay.is_zero() {
            info!("Reconnecting to {} in {:?}", config.api_node, delay);
            tokio::time::sleep(delay).await;
        }
        inner.chain.connect(&config.api_node).await?;
        info!("Monitoring witness {} through {}", config.witness_id, config.api_node);
        inner.events.emit(MonitorEvent::Started);
        Ok(())
    }

    async fn rotate(&self, trigger: RotationTrigger, config: &WitnessConfig) -> RotationOutcome {
        let inner = &self.inner;
        let keys = &config.witness_signing_keys;

        if keys.len() < 2 {
            if let RotationTrigger::MissedBlocks { .. } = trigger {
                inner.state.lock().rotation_muted = true;
            }
            inner.events.notify(format!(
                "Signing key rotation unavailable: only one signing key is configured ({})",
                keys.first().map(String::as_str).unwrap_or("none")
            ));
            return RotationOutcome::Unavailable;
        }

        // Reading the index and taking the ticket under the state lock keeps a
        // finishing rotation from slipping in between.
        let ticket = {
            let state = inner.state.lock();
            let current = state.signing_key_index.min(keys.len() - 1);
            inner.rotation.try_begin(next_key_index(current, keys.len()))
        };
        let Some(ticket) = ticket else {
            info!("Signing key rotation already in progress, request ignored");
            return RotationOutcome::AlreadyInProgress;
        };
        let target = ticket.target_index();

        let outcome = match self.witness_for(config).await {
            Ok(witness) => {
                let reconnect = move || self.ensure_session(config);
                ticket
                    .submit(inner.chain.as_ref(), &witness, &keys[target], &config.private_key, reconnect)
                    .await
            }
            Err(e) => RotationOutcome::Failed {
                key: keys[target].clone(),
                reason: format!("witness {} unavailable: {}", config.witness_id, e),
            },
        };

        match &outcome {
            RotationOutcome::Rotated { key, index } => {
                let now = inner.clock.now();
                let live_keys = inner.config.read().witness_signing_keys.clone();
                {
                    let mut state = inner.state.lock();
                    if live_keys == *keys {
                        state.signing_key_index = *index;
                    } else {
                        // Keys were edited mid-broadcast, `index` points into the old list.
                        state.sync_key_index(&live_keys, key);
                        state.resync_key_index = true;
                    }
                    state.missed.reset_window(now);
                    state.rotation_muted = false;
                    if let Some(witness) = state.last_witness.as_mut() {
                        witness.active_signing_key = key.clone();
                    }
                }
                let message = match trigger {
                    RotationTrigger::MissedBlocks { window_missed } => format!(
                        "Missed block threshold reached ({} missed in the current window). Signing key switched to {}",
                        window_missed, key
                    ),
                    RotationTrigger::Forced => format!("Signing key switched to {}", key),
                };
                inner.events.notify(message);
            }
            RotationOutcome::Failed { key, reason } => {
                inner.events.notify(format!(
                    "Unable to switch signing key to {} after {} attempts: {}",
                    key, ROTATION_ATTEMPTS, reason
                ));
            }
            RotationOutcome::Unavailable | RotationOutcome::AlreadyInProgress => {}
        }
        drop(ticket);
        outcome
    }

    fn announce(&self, transition: Option<HealthTransition>, config: &WitnessConfig, detail: &str) {
        let message = match transition {
            None => return,
            Some(HealthTransition::Degraded {
                failures,
                cause: PollOutcome::Desync,
            }) => format!(
                "Blockchain looks desynchronized for {} consecutive checks: {}",
                failures, detail
            ),
            Some(HealthTransition::Degraded { failures, .. }) => format!(
                "Unable to get data from API node {} for {} consecutive checks: {}",
                config.api_node, failures, detail
            ),
            Some(HealthTransition::Recovered { after_failures }) => format!(
                "Connection to {} is healthy again after {} failed checks",
                config.api_node, after_failures
            ),
        };
        self.inner.events.notify(message);
    }
}

fn stale_feed_message(
    asset: &str,
    publisher: &str,
    publication: Option<DateTime<Utc>>,
    threshold_minutes: u64,
    now: DateTime<Utc>,
) -> String {
    match publication {
        Some(at) => format!(
            "{} feed has not been published for {} minutes (threshold {} min)",
            asset,
            now.signed_duration_since(at).num_minutes(),
            threshold_minutes
        ),
        None => format!(
            "No {} feed publication found for {} (threshold {} min)",
            asset, publisher, threshold_minutes
        ),
    }
}
