use super::profile::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Named conversation with any number of members
    Group,
    /// Unnamed 1:1 conversation, displayed as the other participant
    Private,
}

/// Conversation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn kind(&self) -> ConversationKind {
        match &self.name {
            Some(_) => ConversationKind::Group,
            None => ConversationKind::Private,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind() == ConversationKind::Group
    }
}

/// Membership edge between a conversation and a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

/// Conversation joined with its participants' profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationWithMembers {
    pub conversation: Conversation,
    pub members: Vec<Profile>,
}

/// Conversation to create together with all of its participant edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub name: Option<String>,
    /// Every participant, creator included, without duplicates
    pub participants: Vec<Uuid>,
}

impl NewConversation {
    pub fn private(a: Uuid, b: Uuid) -> Self {
        Self {
            name: None,
            participants: vec![a, b],
        }
    }

    pub fn group(name: impl Into<String>, creator: Uuid, members: impl IntoIterator<Item = Uuid>) -> Self {
        let mut participants = vec![creator];
        for member in members {
            if !participants.contains(&member) {
                participants.push(member);
            }
        }
        Self {
            name: Some(name.into()),
            participants,
        }
    }
}
