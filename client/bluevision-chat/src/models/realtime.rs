use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

/// Broadcast event name carrying composing signals
pub const COMPOSING_EVENT: &str = "typing";

/// Broadcast topic shared by everyone viewing a conversation
pub fn composing_topic(conversation_id: Uuid) -> String {
    format!("chat:{conversation_id}")
}

/// Event delivered by a realtime subscription
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
    Payload(T),
    /// The channel dropped; no further payloads will arrive on it
    Lost(String),
}

/// Ephemeral message on a broadcast topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl BroadcastMessage {
    /// Sender of a composing broadcast, if this is one
    pub fn composing_user(&self) -> Option<Uuid> {
        if self.event != COMPOSING_EVENT {
            return None;
        }
        self.payload
            .get("user_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// "User is composing" signal as observed locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposingSignal {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub received_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_composing_topic() {
        let id = Uuid::nil();
        assert_eq!(
            composing_topic(id),
            "chat:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_composing_user() {
        let user = Uuid::new_v4();
        let message = BroadcastMessage {
            topic: composing_topic(Uuid::new_v4()),
            event: COMPOSING_EVENT.to_string(),
            payload: json!({ "user_id": user.to_string() }),
        };
        assert_eq!(message.composing_user(), Some(user));

        let other = BroadcastMessage {
            event: "presence".to_string(),
            ..message.clone()
        };
        assert_eq!(other.composing_user(), None);

        let garbled = BroadcastMessage {
            payload: json!({ "user_id": 42 }),
            ..message
        };
        assert_eq!(garbled.composing_user(), None);
    }
}
