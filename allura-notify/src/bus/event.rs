//! Bus events and their envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known topics.
pub mod topics {
    /// A notification was created and must be fanned out to mailboxes.
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Payloads carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A notification was persisted.
    NotificationPosted {
        notification_id: String,
        /// Index id of the artifact, for logs.
        artifact_index: String,
    },
}

impl BusEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NotificationPosted { .. } => "notification_posted",
        }
    }
}

/// An event waiting in a topic outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub topic: String,
    pub event: BusEvent,
    pub published_at: DateTime<Utc>,
    /// Failed handling attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl EventEnvelope {
    pub fn new(id: u64, topic: impl Into<String>, event: BusEvent) -> Self {
        Self {
            id,
            topic: topic.into(),
            event,
            published_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = BusEvent::NotificationPosted {
            notification_id: "n1".to_string(),
            artifact_index: "test/wiki/Home".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"notification_posted\""));
        assert_eq!(event.event_type(), "notification_posted");
    }
}
