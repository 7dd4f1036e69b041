use crate::context::ChatContext;
use crate::error::{AppError, AppResult, GatewayError};
use crate::gateway::bounded;
use crate::models::{
    profile::initial_for, Conversation, ConversationKind, ConversationWithMembers, NewConversation,
    Profile, PLACEHOLDER_LABEL,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_GROUP_NAME_LEN: usize = 255;

/// How a conversation is presented in the list and the feed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub name: String,
    pub avatar_url: Option<String>,
    pub initial: char,
    pub kind: ConversationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub conversation: Conversation,
    pub participants: Vec<Profile>,
    pub display: DisplayIdentity,
}

/// Display identity of a conversation as seen by `self_id`
///
/// Groups show their name and no avatar; private conversations show the other
/// participant, or the placeholder label when that profile is missing.
pub fn derive_identity(conversation: &Conversation, participants: &[Profile], self_id: Uuid) -> DisplayIdentity {
    match &conversation.name {
        Some(name) => DisplayIdentity {
            name: name.clone(),
            avatar_url: None,
            initial: initial_for(name),
            kind: ConversationKind::Group,
        },
        None => {
            let other = participants.iter().find(|p| p.id != self_id);
            let name = other
                .map(|p| p.username.clone())
                .unwrap_or_else(|| PLACEHOLDER_LABEL.to_string());
            DisplayIdentity {
                initial: initial_for(&name),
                avatar_url: other.and_then(|p| p.avatar_url.clone()),
                name,
                kind: ConversationKind::Private,
            }
        }
    }
}

/// Case-insensitive substring match on the display name
///
/// A blank query keeps every entry.
pub fn filter_entries(entries: &[DirectoryEntry], query: &str) -> Vec<DirectoryEntry> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return entries.to_vec();
    }
    entries
        .iter()
        .filter(|entry| entry.display.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

pub struct ConversationDirectory {
    ctx: ChatContext,
}

impl ConversationDirectory {
    pub fn new(ctx: ChatContext) -> Self {
        Self { ctx }
    }

    /// Conversations of the signed-in identity, newest first
    ///
    /// Empty while the identity is unresolved.
    pub async fn list_conversations(&self) -> AppResult<Vec<DirectoryEntry>> {
        let Some(user_id) = self.ctx.session.user_id() else {
            debug!("identity unresolved, skipping conversation list");
            return Ok(Vec::new());
        };

        let rows = bounded(
            self.ctx.config.request_timeout,
            self.ctx.gateway.list_conversations(user_id),
        )
        .await
        .map_err(|e| {
            warn!(%user_id, error = %e, "failed to list conversations");
            AppError::backend(e)
        })?;

        let mut entries: Vec<DirectoryEntry> = rows
            .into_iter()
            .map(|ConversationWithMembers { conversation, members }| {
                for member in &members {
                    self.ctx.profiles.remember(member.clone());
                }
                DirectoryEntry {
                    display: derive_identity(&conversation, &members, user_id),
                    conversation,
                    participants: members,
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.conversation
                .created_at
                .cmp(&a.conversation.created_at)
                .then_with(|| b.conversation.id.cmp(&a.conversation.id))
        });

        debug!(%user_id, count = entries.len(), "listed conversations");
        Ok(entries)
    }

    pub fn filter(&self, entries: &[DirectoryEntry], query: &str) -> Vec<DirectoryEntry> {
        filter_entries(entries, query)
    }

    /// Private conversation with `other`, created only if none exists yet
    pub async fn create_private(&self, other: Uuid) -> AppResult<Conversation> {
        let user_id = self.ctx.session.user_id().ok_or(AppError::SignedOut)?;
        if other == user_id {
            return Err(AppError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        if let Some(existing) = self.find_private(user_id, other).await? {
            debug!(conversation_id = %existing.id, "reusing private conversation");
            return Ok(existing);
        }

        let created = bounded(
            self.ctx.config.request_timeout,
            self.ctx
                .gateway
                .create_conversation(NewConversation::private(user_id, other)),
        )
        .await;

        match created {
            Ok(conversation) => {
                info!(conversation_id = %conversation.id, %other, "created private conversation");
                Ok(conversation)
            }
            Err(GatewayError::Conflict(reason)) => {
                // someone created the pair between our lookup and insert
                debug!(%reason, "private conversation already exists, looking it up again");
                self.find_private(user_id, other)
                    .await?
                    .ok_or(AppError::AlreadyExists(reason))
            }
            Err(e) => Err(AppError::backend(e)),
        }
    }

    /// Group conversation named `name` with the caller and `members`
    pub async fn create_group(&self, name: &str, members: &[Uuid]) -> AppResult<Conversation> {
        let user_id = self.ctx.session.user_id().ok_or(AppError::SignedOut)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("group name cannot be empty".into()));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(AppError::Validation(format!(
                "group name too long (max {MAX_GROUP_NAME_LEN})"
            )));
        }

        let new = NewConversation::group(name, user_id, members.iter().copied());
        if new.participants.len() < 2 {
            return Err(AppError::Validation(
                "a group needs at least one other member".into(),
            ));
        }

        let conversation = bounded(
            self.ctx.config.request_timeout,
            self.ctx.gateway.create_conversation(new),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to create group");
            AppError::backend(e)
        })?;

        info!(conversation_id = %conversation.id, "created group conversation");
        Ok(conversation)
    }

    async fn find_private(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        bounded(
            self.ctx.config.request_timeout,
            self.ctx.gateway.find_private_conversation(a, b),
        )
        .await
        .map_err(AppError::backend)
    }
}
