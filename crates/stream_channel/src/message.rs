use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One opaque message travelling over a channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StreamMessage {
    pub id: String,                      // Unique ID (UUID or transport-provided)
    pub channel: String,                 // Channel the message was published on
    pub timestamp: DateTime<Utc>,        // When it was published or received
    pub payload: Value,                  // Body, decoded by the subscriber
}

impl StreamMessage {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Handle returned by a subscription, used to unsubscribe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = StreamMessage::new("scans", json!({"key": "value"}));
        assert_eq!(msg.channel, "scans");
        assert_eq!(msg.payload, json!({"key": "value"}));
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = StreamMessage::new("c", json!(null));
        let b = StreamMessage::new("c", json!(null));
        assert_ne!(a.id, b.id);
    }
}
