//! Link event system.
//!
//! Every state transition, subscription failure, rejected line and accepted
//! reading is broadcast as a [`LinkEvent`], so hosts can log or display the
//! link's progress without polling it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use fsrlink_types::{DeviceId, LinkState, SensorReading, SubscriptionTarget};

/// Events emitted by the link state machine.
///
/// All events are serializable for logging, persistence, and IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LinkEvent {
    /// The link moved to a new state.
    StateChanged {
        device: Option<DeviceId>,
        state: LinkState,
    },
    /// Connected, but the target could not be subscribed.
    SubscriptionFailed {
        device: DeviceId,
        target: SubscriptionTarget,
        reason: String,
    },
    /// A complete line was rejected.
    MalformedLine { line: String, reason: String },
    /// A reading was accepted and handed to the sink.
    ReadingParsed { reading: SensorReading },
    /// A connection attempt failed. `attempt` counts consecutive failures.
    ConnectFailed {
        device: DeviceId,
        attempt: u32,
        error: String,
    },
    /// The next attempt will start after `delay_ms`. `attempt` counts
    /// consecutive failures so far.
    ReconnectScheduled {
        device: DeviceId,
        attempt: u32,
        delay_ms: u64,
    },
}

/// Sender for link events.
pub type EventSender = broadcast::Sender<LinkEvent>;

/// Receiver for link events.
pub type EventReceiver = broadcast::Receiver<LinkEvent>;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: LinkEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
