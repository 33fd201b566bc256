// EVENT EMITTER
// Single one-way channel from the engine to whatever front end subscribes
//
// SAFETY INVARIANTS:
// 1. The engine never calls into the front end, it only publishes events
// 2. Publishing never blocks and never fails when nobody is listening
// 3. Notification text never contains key material

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// Monitoring (re)started: first connection or full reconnect
    Started,
    /// A check-interval poll cycle finished, whatever its outcome
    Checked,
    /// Human-readable notification for the operator
    Notify(String),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Started => "started",
            MonitorEvent::Checked => "checked",
            MonitorEvent::Notify(_) => "notify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<MonitorEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventEmitter { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: MonitorEvent) {
        match &event {
            MonitorEvent::Notify(message) => info!("notify: {}", message),
            other => debug!("event: {}", other.name()),
        }
        // No receivers is fine: the front end may not be attached yet.
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, message: impl Into<String>) {
        self.emit(MonitorEvent::Notify(message.into()));
    }
}
