use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message row; `id` and `created_at` are assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Total order used by the feed: server timestamp, then id
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Insert payload for a new message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

/// Author columns joined onto a history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// History row: the message plus its author's profile when the join found one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub sender: Option<SenderProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_row_with_joined_sender() {
        let json = serde_json::json!({
            "id": "0b5d0a36-9c55-4a8a-a3f2-7b7c1a3f9e01",
            "conversation_id": "6f1c0d1e-7f6f-4a43-9b7c-1f0e6b1e2a10",
            "sender_id": "2f7e8d4c-5b1a-4c3e-9f0d-8e7c6b5a4d3c",
            "content": "salut",
            "created_at": "2024-05-01T10:00:00+00:00",
            "sender": { "username": "alice", "avatar_url": null }
        });

        let row: MessageWithSender = serde_json::from_value(json).unwrap();

        assert_eq!(row.message.content, "salut");
        assert_eq!(row.sender.unwrap().username, "alice");
    }

    #[test]
    fn test_history_row_without_sender() {
        let json = serde_json::json!({
            "id": "0b5d0a36-9c55-4a8a-a3f2-7b7c1a3f9e01",
            "conversation_id": "6f1c0d1e-7f6f-4a43-9b7c-1f0e6b1e2a10",
            "sender_id": "2f7e8d4c-5b1a-4c3e-9f0d-8e7c6b5a4d3c",
            "content": "salut",
            "created_at": "2024-05-01T10:00:00Z",
            "sender": null
        });

        let row: MessageWithSender = serde_json::from_value(json).unwrap();
        assert!(row.sender.is_none());
    }
}
