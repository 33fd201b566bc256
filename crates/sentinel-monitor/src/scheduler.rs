// POLL SCHEDULER
// Two fixed-interval timers driving the check and feed polls
//
// SAFETY INVARIANTS:
// 1. Late ticks are skipped, never bunched up after a stall
// 2. Poll work runs on its own task, the timers keep their cadence
// 3. Interval edits re-arm the affected timer from the moment they are seen
// 4. Dropping or signalling the handle stops the timers; in-flight polls finish on their own

use crate::engine::WitnessMonitor;
use log::{debug, info};
use sentinel_core::WitnessConfig;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

pub fn check_period(config: &WitnessConfig) -> Duration {
    Duration::from_secs(config.checking_interval.max(1))
}

pub fn feed_period(config: &WitnessConfig) -> Duration {
    Duration::from_secs(config.feed_checking_interval.max(1).saturating_mul(60))
}

fn ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub struct Scheduler {
    monitor: WitnessMonitor,
}

impl Scheduler {
    pub fn new(monitor: WitnessMonitor) -> Self {
        Scheduler { monitor }
    }

    pub fn start(self) -> SchedulerHandle {
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(self.run(rx));
        SchedulerHandle {
            shutdown: tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let config = self.monitor.config();
        let mut check_every = check_period(&config);
        let mut feeds_every = feed_period(&config);
        let now = Instant::now();
        let mut check_ticker = ticker(now, check_every);
        let mut feed_ticker = ticker(now, feeds_every);
        info!(
            "Scheduler started: checks every {:?}, feeds every {:?}",
            check_every, feeds_every
        );

        loop {
            tokio::select! {
                _ = check_ticker.tick() => {
                    let monitor = self.monitor.clone();
                    tokio::spawn(async move {
                        let report = monitor.check().await;
                        debug!("check: {:?}", report);
                    });

                    let period = check_period(&self.monitor.config());
                    if period != check_every {
                        info!("Checking interval changed to {:?}", period);
                        check_every = period;
                        check_ticker = ticker(Instant::now() + period, period);
                    }
                }
                _ = feed_ticker.tick() => {
                    let monitor = self.monitor.clone();
                    tokio::spawn(async move {
                        let report = monitor.check_feeds().await;
                        debug!("feed check: {:?}", report);
                    });

                    let period = feed_period(&self.monitor.config());
                    if period != feeds_every {
                        info!("Feed checking interval changed to {:?}", period);
                        feeds_every = period;
                        feed_ticker = ticker(Instant::now() + period, period);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// Stop the timers and wait for the loop to exit.
    pub async fn shutdown(&self) {
        if self.shutdown.send(true).is_err() {
            return;
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(err) = handle.await {
                debug!("Scheduler worker exited with error: {}", err);
            }
        }
    }
}
