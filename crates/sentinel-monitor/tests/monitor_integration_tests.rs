// MONITOR INTEGRATION TESTS
// Drives WitnessMonitor against a scripted chain and a hand-driven clock
//
// Test Categories:
// 1. Bring-up and missed-block window
// 2. Signing key rotation
// 3. Connection health and desync
// 4. Feed staleness
// 5. Operator commands and live configuration
// 6. Scheduler timing

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use sentinel_chain::ChainClient;
use sentinel_core::{
    ChainError, Clock, ConfigUpdate, HeadBlock, ManualClock, MonitorEvent, RunMode, SigningSecret, TransactionFailure,
    WitnessConfig, WitnessInfo,
};
use sentinel_monitor::{CheckReport, FeedCheckReport, RotationOutcome, WitnessMonitor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

const PRIVATE_WIF: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";
const KEY_A: &str = "TUSC_KEY_A";
const KEY_B: &str = "TUSC_KEY_B";
const KEY_C: &str = "TUSC_KEY_C";

const CONFIG: &str = r#"{
    "witness_id": "1.6.93",
    "api_node": "wss://node.example",
    "private_key": "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3",
    "witness_signing_keys": ["TUSC_KEY_A", "TUSC_KEY_B", "TUSC_KEY_C"],
    "missed_block_threshold": 3,
    "checking_interval": 10,
    "reset_period": 300,
    "retries_threshold": 3,
    "stale_blockchain_threshold": 60,
    "feeds_to_check": { "USD": 60, "HERTZ": 30 },
    "feed_checking_interval": 10,
    "recap_time": 0
}"#;

// ============================================================================
// SCRIPTED CHAIN
// ============================================================================

struct Script {
    reachable: bool,
    head_age_secs: i64,
    height: u64,
    total_missed: u64,
    active_key: String,
    failing_broadcasts: u32,
    broadcast_attempts: u32,
    broadcasts: Vec<String>,
    feeds: HashMap<String, Option<DateTime<Utc>>>,
    unknown_assets: Vec<String>,
    connects: Vec<String>,
    session: Option<String>,
    head_gate: Option<Arc<Notify>>,
    broadcast_gate: Option<Arc<Notify>>,
}

struct FakeChain {
    clock: Arc<ManualClock>,
    script: Mutex<Script>,
}

impl FakeChain {
    fn new(clock: Arc<ManualClock>) -> Self {
        FakeChain {
            clock,
            script: Mutex::new(Script {
                reachable: true,
                head_age_secs: 2,
                height: 1_000,
                total_missed: 10,
                active_key: KEY_A.to_string(),
                failing_broadcasts: 0,
                broadcast_attempts: 0,
                broadcasts: Vec::new(),
                feeds: HashMap::new(),
                unknown_assets: Vec::new(),
                connects: Vec::new(),
                session: None,
                head_gate: None,
                broadcast_gate: None,
            }),
        }
    }

    fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
        self.script.lock()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn connect(&self, endpoint: &str) -> Result<(), ChainError> {
        let mut script = self.script.lock();
        script.connects.push(endpoint.to_string());
        if !script.reachable {
            return Err(ChainError::Connection("connection refused".into()));
        }
        script.session = Some(endpoint.to_string());
        Ok(())
    }

    fn session_endpoint(&self) -> Option<String> {
        self.script.lock().session.clone()
    }

    fn disconnect(&self) {
        self.script.lock().session = None;
    }

    async fn head_block(&self) -> Result<HeadBlock, ChainError> {
        let gate = self.script.lock().head_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut script = self.script.lock();
        if !script.reachable {
            script.session = None;
            return Err(ChainError::Connection("connection reset".into()));
        }
        script.height += 1;
        Ok(HeadBlock {
            height: script.height,
            id: format!("{:08x}aabbccdd", script.height),
            timestamp: self.clock.now() - Duration::seconds(script.head_age_secs),
        })
    }

    async fn witness_info(&self, witness_id: &str) -> Result<WitnessInfo, ChainError> {
        let script = self.script.lock();
        if !script.reachable {
            return Err(ChainError::Connection("connection reset".into()));
        }
        Ok(WitnessInfo {
            witness_id: witness_id.to_string(),
            witness_account: "1.2.1234".into(),
            active_signing_key: script.active_key.clone(),
            total_missed: script.total_missed,
            total_votes: 5_000,
            is_active: true,
        })
    }

    async fn feed_timestamp(&self, asset: &str, _publisher: &str) -> Result<Option<DateTime<Utc>>, ChainError> {
        let script = self.script.lock();
        if script.unknown_assets.iter().any(|a| a == asset) {
            return Err(ChainError::NotFound(format!("asset {}", asset)));
        }
        Ok(script.feeds.get(asset).cloned().flatten())
    }

    async fn broadcast_key_update(
        &self,
        _witness: &WitnessInfo,
        new_key: &str,
        _private_key: &SigningSecret,
    ) -> Result<(), ChainError> {
        let gate = self.script.lock().broadcast_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut script = self.script.lock();
        script.broadcast_attempts += 1;
        if script.failing_broadcasts > 0 {
            script.failing_broadcasts -= 1;
            // Transport failures end the session, as RpcChainClient does.
            script.session = None;
            return Err(ChainError::Transaction(TransactionFailure::Network("timeout".into())));
        }
        script.broadcasts.push(new_key.to_string());
        script.active_key = new_key.to_string();
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    monitor: WitnessMonitor,
    chain: Arc<FakeChain>,
    clock: Arc<ManualClock>,
    events: broadcast::Receiver<MonitorEvent>,
}

impl Harness {
    fn new(config: WitnessConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()));
        let chain = Arc::new(FakeChain::new(clock.clone()));
        let monitor = WitnessMonitor::new(config, chain.clone(), clock.clone());
        let events = monitor.subscribe();
        Harness {
            monitor,
            chain,
            clock,
            events,
        }
    }

    fn standard() -> Self {
        Self::new(config())
    }

    fn drain(&mut self) -> Vec<MonitorEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn notifications(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                MonitorEvent::Notify(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn miss(&self, blocks: u64) {
        self.chain.script().total_missed += blocks;
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn config() -> WitnessConfig {
    let config = WitnessConfig::from_json_str(CONFIG).unwrap();
    config.validate().unwrap();
    config
}

// ============================================================================
// 1. BRING-UP AND MISSED-BLOCK WINDOW
// ============================================================================

#[tokio::test]
async fn test_01_first_check_connects_and_emits_started_then_checked() {
    let mut h = Harness::standard();

    let report = h.monitor.check().await;
    assert!(matches!(report, CheckReport::Completed { newly_missed: 0, .. }));
    assert_eq!(h.drain(), vec![MonitorEvent::Started, MonitorEvent::Checked]);

    h.monitor.check().await;
    assert_eq!(h.drain(), vec![MonitorEvent::Checked]);
    assert_eq!(h.chain.script().connects, vec!["wss://node.example".to_string()]);
}

#[tokio::test]
async fn test_02_missed_blocks_count_from_baseline() {
    let mut h = Harness::standard();
    h.monitor.check().await;

    h.miss(1);
    let report = h.monitor.check().await;
    assert_eq!(
        report,
        CheckReport::Completed {
            newly_missed: 1,
            window_missed: 1,
            rotation: None
        }
    );

    let notes = h.notifications();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("missed 1 block(s)"));

    let stats = h.monitor.current_statistics();
    assert_eq!(stats.total_missed, 1);
    assert_eq!(stats.window_missed, 1);
    assert_eq!(stats.total_votes, Some(5_000));
    assert_eq!(stats.is_activated, Some(true));
}

#[tokio::test]
async fn test_03_window_resets_after_reset_period_without_new_misses() {
    let h = Harness::standard();
    h.monitor.check().await;
    h.miss(2);
    h.monitor.check().await;

    h.clock.advance(Duration::seconds(300));
    h.monitor.check().await;
    assert_eq!(h.monitor.current_statistics().window_missed, 2);

    h.clock.advance(Duration::seconds(1));
    h.monitor.check().await;
    let stats = h.monitor.current_statistics();
    assert_eq!(stats.window_missed, 0);
    assert_eq!(stats.total_missed, 2);
}

#[tokio::test]
async fn test_04_statistics_before_first_poll_are_empty() {
    let h = Harness::standard();
    let stats = h.monitor.current_statistics();
    assert_eq!(stats.total_missed, 0);
    assert_eq!(stats.total_votes, None);
    assert_eq!(stats.signing_key, KEY_A);
    assert_eq!(stats.run_mode, RunMode::Running);
    assert_eq!(stats.feed_publications.len(), 2);
    assert!(stats.last_head_block.is_none());
}

// ============================================================================
// 2. SIGNING KEY ROTATION
// ============================================================================

#[tokio::test]
async fn test_05_auto_rotation_fires_once_at_threshold() {
    let mut h = Harness::standard();
    h.monitor.check().await;

    h.miss(2);
    h.monitor.check().await;
    assert!(h.chain.script().broadcasts.is_empty());

    h.miss(1);
    let report = h.monitor.check().await;
    assert_eq!(
        report,
        CheckReport::Completed {
            newly_missed: 1,
            window_missed: 3,
            rotation: Some(RotationOutcome::Rotated {
                key: KEY_B.to_string(),
                index: 1
            }),
        }
    );
    assert!(h
        .notifications()
        .iter()
        .any(|n| n.contains("Missed block threshold reached") && n.contains(KEY_B)));

    // Same counts on the next poll must not fire again.
    h.monitor.check().await;
    assert_eq!(h.chain.script().broadcasts, vec![KEY_B.to_string()]);

    let stats = h.monitor.current_statistics();
    assert_eq!(stats.signing_key, KEY_B);
    assert_eq!(stats.window_missed, 0);
    assert_eq!(stats.total_missed, 3);
    assert!(!stats.rotation_in_progress);
}

#[tokio::test]
async fn test_06_failed_rotation_retries_once_and_keeps_state() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.chain.script().failing_broadcasts = 2;

    h.miss(3);
    let report = h.monitor.check().await;
    match report {
        CheckReport::Completed {
            rotation: Some(RotationOutcome::Failed { key, .. }),
            ..
        } => assert_eq!(key, KEY_B),
        other => panic!("unexpected report {:?}", other),
    }
    assert_eq!(h.chain.script().broadcast_attempts, 2);
    assert!(h
        .notifications()
        .iter()
        .any(|n| n.contains("Unable to switch signing key to TUSC_KEY_B after 2 attempts")));

    let stats = h.monitor.current_statistics();
    assert_eq!(stats.signing_key, KEY_A);
    assert_eq!(stats.window_missed, 3);

    // Threshold still holds, the next poll tries again.
    let report = h.monitor.check().await;
    assert!(matches!(
        report,
        CheckReport::Completed {
            rotation: Some(RotationOutcome::Rotated { index: 1, .. }),
            ..
        }
    ));
}

#[tokio::test]
async fn test_07_second_attempt_success_counts_as_rotation() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.drain();
    h.chain.script().failing_broadcasts = 1;

    let outcome = h.monitor.force_update_signing_key().await;
    assert_eq!(
        outcome,
        RotationOutcome::Rotated {
            key: KEY_B.to_string(),
            index: 1
        }
    );
    assert_eq!(h.chain.script().broadcast_attempts, 2);
    assert_eq!(h.chain.script().connects.len(), 2);
    assert_eq!(h.drain()[0], MonitorEvent::Started);
}

#[tokio::test]
async fn test_08_forced_rotation_wraps_key_index() {
    let h = Harness::standard();
    h.chain.script().active_key = KEY_C.to_string();
    h.monitor.check().await;
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_C);

    let outcome = h.monitor.force_update_signing_key().await;
    assert_eq!(
        outcome,
        RotationOutcome::Rotated {
            key: KEY_A.to_string(),
            index: 0
        }
    );
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_A);
}

#[tokio::test]
async fn test_09_single_key_rotation_is_unavailable() {
    let mut config = config();
    config.witness_signing_keys = vec![KEY_A.to_string()];
    let mut h = Harness::new(config);
    h.monitor.check().await;
    h.drain();

    assert_eq!(h.monitor.force_update_signing_key().await, RotationOutcome::Unavailable);
    let notes = h.notifications();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("rotation unavailable"));

    h.miss(3);
    h.monitor.check().await;
    h.miss(1);
    h.monitor.check().await;
    let unavailable = h
        .notifications()
        .into_iter()
        .filter(|n| n.contains("rotation unavailable"))
        .count();
    assert_eq!(unavailable, 1);
    assert!(h.chain.script().broadcasts.is_empty());
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_A);
}

#[tokio::test]
async fn test_10_concurrent_rotation_request_is_rejected() {
    let h = Harness::standard();
    h.monitor.check().await;
    let gate = Arc::new(Notify::new());
    h.chain.script().broadcast_gate = Some(gate.clone());

    let monitor = h.monitor.clone();
    let first = tokio::spawn(async move { monitor.force_update_signing_key().await });
    while !h.monitor.current_statistics().rotation_in_progress {
        tokio::task::yield_now().await;
    }

    assert_eq!(h.monitor.force_update_signing_key().await, RotationOutcome::AlreadyInProgress);

    gate.notify_one();
    assert!(first.await.unwrap().is_rotated());
    assert_eq!(h.chain.script().broadcasts.len(), 1);
    assert!(!h.monitor.current_statistics().rotation_in_progress);
}

#[tokio::test]
async fn test_11_key_edit_during_rotation_keeps_index_in_range() {
    let h = Harness::standard();
    h.chain.script().active_key = KEY_B.to_string();
    h.monitor.check().await;
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_B);

    let gate = Arc::new(Notify::new());
    h.chain.script().broadcast_gate = Some(gate.clone());
    let monitor = h.monitor.clone();
    let rotation = tokio::spawn(async move { monitor.force_update_signing_key().await });
    while !h.monitor.current_statistics().rotation_in_progress {
        tokio::task::yield_now().await;
    }

    let shrunk = vec!["TUSC_KEY_X".to_string(), "TUSC_KEY_Y".to_string()];
    h.monitor
        .update_config(ConfigUpdate::SigningKeys(shrunk.clone()))
        .unwrap();
    gate.notify_one();

    assert_eq!(
        rotation.await.unwrap(),
        RotationOutcome::Rotated {
            key: KEY_C.to_string(),
            index: 2
        }
    );
    let signing_key = h.monitor.current_statistics().signing_key;
    assert!(shrunk.contains(&signing_key), "signing key {:?} outside {:?}", signing_key, shrunk);

    // A key still present in the edited list is picked up by position.
    h.chain.script().broadcast_gate = None;
    h.monitor
        .update_config(ConfigUpdate::SigningKeys(vec![
            "TUSC_KEY_X".into(),
            KEY_C.into(),
        ]))
        .unwrap();
    h.monitor.check().await;
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_C);
}

// ============================================================================
// 3. CONNECTION HEALTH AND DESYNC
// ============================================================================

#[tokio::test]
async fn test_12_overlapping_checks_are_skipped() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.drain();

    let gate = Arc::new(Notify::new());
    h.chain.script().head_gate = Some(gate.clone());
    let monitor = h.monitor.clone();
    let first = tokio::spawn(async move { monitor.check().await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(h.monitor.check().await, CheckReport::Skipped);

    h.chain.script().head_gate = None;
    gate.notify_one();
    assert!(matches!(first.await.unwrap(), CheckReport::Completed { .. }));
    assert_eq!(h.drain(), vec![MonitorEvent::Checked]);
}

#[tokio::test(start_paused = true)]
async fn test_13_connection_failures_escalate_once_and_recover_once() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.drain();

    h.chain.script().reachable = false;
    for _ in 0..5 {
        assert_eq!(h.monitor.check().await, CheckReport::ConnectionFailure);
    }
    let events = h.drain();
    let checked = events.iter().filter(|e| **e == MonitorEvent::Checked).count();
    assert_eq!(checked, 5);
    let degraded: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::Notify(m) if m.contains("Unable to get data from API node")))
        .collect();
    assert_eq!(degraded.len(), 1);
    assert_eq!(h.monitor.current_statistics().consecutive_failures, 5);

    h.chain.script().reachable = true;
    assert!(matches!(h.monitor.check().await, CheckReport::Completed { .. }));
    let events = h.drain();
    assert_eq!(events.first(), Some(&MonitorEvent::Started));
    let recovered = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::Notify(m) if m.contains("healthy again")))
        .count();
    assert_eq!(recovered, 1);

    h.monitor.check().await;
    assert!(h.notifications().is_empty());
    assert_eq!(h.monitor.current_statistics().consecutive_failures, 0);
}

#[tokio::test]
async fn test_14_stale_head_block_counts_as_desync() {
    let mut h = Harness::standard();
    h.chain.script().head_age_secs = 120;

    for _ in 0..4 {
        assert_eq!(h.monitor.check().await, CheckReport::Desync);
    }
    let desync = h
        .notifications()
        .into_iter()
        .filter(|n| n.contains("desynchronized"))
        .count();
    assert_eq!(desync, 1);

    let stats = h.monitor.current_statistics();
    assert_eq!(stats.consecutive_failures, 4);
    assert!(stats.last_head_block.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_15_reconnect_re_emits_started() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.chain.disconnect();

    h.monitor.check().await;
    assert_eq!(h.drain(), vec![MonitorEvent::Started, MonitorEvent::Checked, MonitorEvent::Started, MonitorEvent::Checked]);
    assert_eq!(h.chain.script().connects.len(), 2);
}

// ============================================================================
// 4. FEED STALENESS
// ============================================================================

#[tokio::test]
async fn test_16_stale_feed_alerts_once_per_episode() {
    let mut h = Harness::standard();
    let now = h.now();
    {
        let mut script = h.chain.script();
        script.feeds.insert("USD".into(), Some(now - Duration::minutes(65)));
        script.feeds.insert("HERTZ".into(), Some(now - Duration::minutes(5)));
    }
    h.monitor.check().await;
    h.drain();

    assert_eq!(
        h.monitor.check_feeds().await,
        FeedCheckReport::Completed {
            checked: 2,
            newly_stale: vec!["USD".to_string()]
        }
    );
    let notes = h.notifications();
    assert_eq!(notes, vec!["USD feed has not been published for 65 minutes (threshold 60 min)".to_string()]);

    h.monitor.check_feeds().await;
    assert!(h.notifications().is_empty());

    h.chain.script().feeds.insert("USD".into(), Some(now));
    h.monitor.check_feeds().await;
    assert!(h.notifications().is_empty());

    h.clock.advance(Duration::minutes(61));
    h.monitor.check_feeds().await;
    assert_eq!(h.notifications().len(), 2, "USD and HERTZ both went stale");
}

#[tokio::test]
async fn test_17_never_published_feed_is_stale() {
    let mut h = Harness::standard();
    h.chain.script().feeds.insert("HERTZ".into(), Some(h.now()));

    let report = h.monitor.check_feeds().await;
    assert_eq!(
        report,
        FeedCheckReport::Completed {
            checked: 2,
            newly_stale: vec!["USD".to_string()]
        }
    );
    assert!(h
        .notifications()
        .iter()
        .any(|n| n.starts_with("No USD feed publication found for 1.2.1234")));
}

#[tokio::test]
async fn test_18_reset_feed_check_rearms_alerts() {
    let mut h = Harness::standard();
    h.monitor.check_feeds().await;
    assert_eq!(h.notifications().len(), 2);

    h.monitor.check_feeds().await;
    assert!(h.notifications().is_empty());

    h.monitor.reset_feed_check();
    assert!(h
        .monitor
        .current_statistics()
        .feed_publications
        .iter()
        .all(|f| !f.stale_notified && f.last_publication.is_none()));
    h.monitor.check_feeds().await;
    assert_eq!(h.notifications().len(), 2);
}

#[tokio::test]
async fn test_19_unknown_asset_is_reported_once() {
    let mut h = Harness::standard();
    {
        let mut script = h.chain.script();
        script.unknown_assets.push("HERTZ".into());
        script.feeds.insert("USD".into(), Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 0).unwrap()));
    }

    h.monitor.check_feeds().await;
    h.monitor.check_feeds().await;
    let notes = h.notifications();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("Unable to check HERTZ feed"));
}

#[tokio::test(start_paused = true)]
async fn test_20_feed_failures_leave_health_untouched() {
    let h = Harness::standard();
    h.monitor.check().await;
    h.chain.script().reachable = false;
    h.chain.disconnect();

    assert_eq!(h.monitor.check_feeds().await, FeedCheckReport::Unreachable);
    assert_eq!(h.monitor.current_statistics().consecutive_failures, 0);
}

// ============================================================================
// 5. OPERATOR COMMANDS AND LIVE CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_21_pause_suppresses_all_poll_logic() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.drain();

    h.monitor.pause();
    let height = h.chain.script().height;
    assert_eq!(h.monitor.check().await, CheckReport::Paused);
    assert_eq!(h.monitor.check_feeds().await, FeedCheckReport::Paused);
    assert!(h.drain().is_empty());
    assert_eq!(h.chain.script().height, height);
    assert_eq!(h.monitor.current_statistics().run_mode, RunMode::Paused);

    h.monitor.resume();
    assert!(matches!(h.monitor.check().await, CheckReport::Completed { .. }));
    assert_eq!(h.drain(), vec![MonitorEvent::Checked]);
}

#[tokio::test]
async fn test_22_reset_window_command_keeps_lifetime_total() {
    let h = Harness::standard();
    h.monitor.check().await;
    h.miss(2);
    h.monitor.check().await;

    h.monitor.reset_missed_block_window();
    let stats = h.monitor.current_statistics();
    assert_eq!(stats.window_missed, 0);
    assert_eq!(stats.total_missed, 2);

    // Two more misses stay below the threshold of three.
    h.miss(2);
    let report = h.monitor.check().await;
    assert!(matches!(
        report,
        CheckReport::Completed {
            window_missed: 2,
            rotation: None,
            ..
        }
    ));
}

#[tokio::test]
async fn test_23_invalid_edit_is_rejected_and_keeps_settings() {
    let h = Harness::standard();
    let before = h.monitor.settings();

    let err = h
        .monitor
        .update_config(ConfigUpdate::MissedBlockThreshold(0))
        .unwrap_err();
    assert!(!err.problems("missed_block_threshold").is_empty());
    assert_eq!(h.monitor.settings(), before);

    tokio_test::assert_ok!(h.monitor.update_config(ConfigUpdate::MissedBlockThreshold(5)));
    assert_eq!(h.monitor.settings().missed_block_threshold, 5);
}

#[tokio::test]
async fn test_24_feed_edit_rebuilds_records() {
    let h = Harness::standard();
    let mut feeds = BTreeMap::new();
    feeds.insert("cny".to_string(), 15);

    h.monitor.update_config(ConfigUpdate::FeedsToCheck(feeds)).unwrap();
    let assets: Vec<_> = h
        .monitor
        .current_statistics()
        .feed_publications
        .into_iter()
        .map(|f| f.asset)
        .collect();
    assert_eq!(assets, vec!["CNY".to_string()]);
}

#[tokio::test]
async fn test_25_api_node_edit_reconnects_on_next_check() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.drain();

    h.monitor
        .update_config(ConfigUpdate::ApiNode("wss://backup.example".into()))
        .unwrap();
    assert_eq!(h.chain.session_endpoint().as_deref(), Some("wss://node.example"));

    h.monitor.check().await;
    assert_eq!(h.drain(), vec![MonitorEvent::Started, MonitorEvent::Checked]);
    assert_eq!(h.chain.session_endpoint().as_deref(), Some("wss://backup.example"));
}

#[tokio::test]
async fn test_26_signing_key_edit_resyncs_index() {
    let h = Harness::standard();
    h.monitor.check().await;
    h.monitor.force_update_signing_key().await;
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_B);

    h.monitor
        .update_config(ConfigUpdate::SigningKeys(vec![
            "TUSC_KEY_X".into(),
            "TUSC_KEY_Y".into(),
            KEY_B.into(),
        ]))
        .unwrap();
    assert_eq!(h.monitor.current_statistics().signing_key, KEY_B);

    let outcome = h.monitor.force_update_signing_key().await;
    assert_eq!(
        outcome,
        RotationOutcome::Rotated {
            key: "TUSC_KEY_X".into(),
            index: 0
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_27_private_key_never_leaves_the_engine() {
    let mut h = Harness::standard();
    h.monitor.check().await;
    h.chain.script().failing_broadcasts = 2;
    h.monitor.force_update_signing_key().await;
    h.monitor.force_update_signing_key().await;
    h.chain.script().reachable = false;
    for _ in 0..4 {
        h.monitor.check().await;
    }

    let mut rendered: Vec<String> = h.drain().iter().map(|e| format!("{:?}", e)).collect();
    rendered.push(h.monitor.current_statistics().to_string());
    rendered.push(h.monitor.settings().to_string());
    rendered.push(format!("{:?}", h.monitor.config()));
    assert!(rendered.iter().all(|text| !text.contains(PRIVATE_WIF)));
}

// ============================================================================
// 6. SCHEDULER TIMING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_28_scheduler_checks_immediately_and_stops_on_shutdown() {
    let mut h = Harness::standard();
    let handle = h.monitor.start_monitoring();

    let first = tokio::time::timeout(std::time::Duration::from_secs(1), h.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, MonitorEvent::Started);

    handle.shutdown().await;
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    h.drain();
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    assert!(h.drain().iter().all(|e| *e != MonitorEvent::Checked));
}

#[tokio::test(start_paused = true)]
async fn test_29_pause_then_resume_does_not_double_fire() {
    let mut h = Harness::standard();
    let handle = h.monitor.start_monitoring();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert!(h.drain().contains(&MonitorEvent::Checked));

    h.monitor.pause();
    tokio::time::sleep(std::time::Duration::from_secs(34)).await;
    assert!(h.drain().is_empty());

    h.monitor.resume();
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    let checked = h.drain().into_iter().filter(|e| *e == MonitorEvent::Checked).count();
    assert_eq!(checked, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_30_interval_edit_rearms_check_timer() {
    let mut h = Harness::standard();
    let handle = h.monitor.start_monitoring();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    h.drain();

    h.monitor.update_config(ConfigUpdate::CheckingInterval(30)).unwrap();
    // The tick at t=10 still fires on the old cadence and re-arms to 30 s.
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(h.drain().into_iter().filter(|e| *e == MonitorEvent::Checked).count(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(25)).await;
    assert!(h.drain().is_empty());

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(h.drain().into_iter().filter(|e| *e == MonitorEvent::Checked).count(), 1);

    handle.shutdown().await;
}
