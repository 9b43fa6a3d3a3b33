//! Engine event system for state-change notifications.
//!
//! The presentation layer subscribes to these events (or polls the stores
//! directly); nothing in the engine waits on a subscriber, and a lagging
//! subscriber only loses events, never blocks a channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use fleetsync_types::{DeviceStatus, LogCategory};

/// Events emitted by the synchronization engine.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EngineEvent {
    /// A full snapshot replaced the device set.
    SnapshotApplied {
        /// Number of devices in the new set.
        count: usize,
    },
    /// A device record changed (patch applied or inserted).
    DeviceUpdated {
        /// The device that changed.
        device_id: String,
    },
    /// A device's display status changed.
    StatusChanged {
        /// The device whose status changed.
        device_id: String,
        /// Previous status.
        from: DeviceStatus,
        /// New status.
        to: DeviceStatus,
    },
    /// New readings were merged into a device's rolling window.
    ReadingsMerged {
        /// The device the readings belong to.
        device_id: String,
        /// Number of readings in the batch.
        count: usize,
    },
    /// A new (non-duplicate) log entry arrived over push.
    LogReceived {
        /// The category the entry landed in.
        category: LogCategory,
        /// The entry identifier.
        id: i64,
    },
    /// A channel established its socket.
    ChannelConnected {
        /// Channel name.
        channel: String,
    },
    /// A channel lost its socket abnormally.
    ChannelDown {
        /// Channel name.
        channel: String,
        /// Close code, if the peer sent one.
        close_code: Option<u16>,
    },
    /// A reconnect was scheduled for a channel.
    ReconnectScheduled {
        /// Channel name.
        channel: String,
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt, in milliseconds.
        delay_ms: u64,
    },
    /// The clock offset was refreshed against the server.
    ClockRefreshed {
        /// New offset in milliseconds (server minus local).
        offset_millis: i64,
    },
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<EngineEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<EngineEvent>;

/// Event dispatcher fanning engine events out to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_and_receive() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        dispatcher.send(EngineEvent::SnapshotApplied { count: 3 });

        match rx.recv().await.unwrap() {
            EngineEvent::SnapshotApplied { count } => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_send_without_receivers_is_ok() {
        let dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.receiver_count(), 0);
        // Must not panic or block.
        dispatcher.send(EngineEvent::ChannelConnected {
            channel: "home-feed".to_string(),
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::StatusChanged {
            device_id: "dl-001".to_string(),
            from: DeviceStatus::Active,
            to: DeviceStatus::Offline,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status_changed\""));
        assert!(json.contains("dl-001"));
        assert!(json.contains("offline"));
    }
}
