//! Broadcast bus delivering adapter events to the entity layer.
//!
//! The adapter is the only publisher. Consumers subscribe for field-level
//! change notifications plus the connectivity and degraded-mode signals;
//! slow consumers lag rather than block the poll loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::FieldChange;

/// Buffered events per subscriber before lagging
const BUS_CAPACITY: usize = 64;

/// Events published by the device adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DeviceEvent {
    /// One snapshot field changed between polls
    FieldChanged(FieldChange),

    /// The device stopped answering status polls. Emitted once per outage,
    /// not once per failed poll.
    DeviceUnreachable { host: String },

    /// The device is answering again after an outage. A full-refresh diff
    /// follows as individual `FieldChanged` events.
    DeviceReachable { host: String },

    /// The device answered with a payload the bridge does not understand
    /// (likely a protocol/version mismatch). Polling continues.
    ProtocolMismatch { host: String, detail: String },
}

impl DeviceEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FieldChanged(_) => "field_changed",
            Self::DeviceUnreachable { .. } => "device_unreachable",
            Self::DeviceReachable { .. } => "device_reachable",
            Self::ProtocolMismatch { .. } => "protocol_mismatch",
        }
    }
}

/// Broadcast channel wrapper shared between the adapter and its consumers.
pub struct EventBus {
    tx: broadcast::Sender<DeviceEvent>,
}

pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::new())
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: DeviceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = create_bus();
        bus.publish(DeviceEvent::DeviceUnreachable {
            host: "10.0.0.5".to_string(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = create_bus();
        let mut rx = bus.subscribe();

        bus.publish(DeviceEvent::DeviceReachable {
            host: "10.0.0.5".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "device_reachable");
    }

    #[test]
    fn event_serialization_round_trips() {
        let event = DeviceEvent::ProtocolMismatch {
            host: "10.0.0.5".to_string(),
            detail: "unrecognized status".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("protocol_mismatch") || json.contains("ProtocolMismatch"));

        let deserialized: DeviceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
