//! In-process backend
//!
//! Mirrors the observable behaviour of the hosted backend: server-assigned ids
//! and monotonic timestamps, realtime fan-out, private-pair uniqueness and
//! atomic conversation creation. Clients created with
//! [`InMemoryBackend::new_client`] share the data but hold their own session.

use super::registry::SubscriberRegistry;
use super::{AuthApi, AuthSession, BlobStore, RealtimeApi, RecordStore, Subscription};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    composing_topic, BroadcastMessage, Conversation, ConversationWithMembers, Message,
    MessageWithSender, NewConversation, NewMessage, Participant, Profile, ProfileUpdate,
    SenderProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

struct Account {
    user_id: Uuid,
    secret: String,
}

#[derive(Default)]
struct Store {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    conversations: HashMap<Uuid, Conversation>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    blobs: HashMap<String, (Vec<u8>, String)>,
    last_timestamp: Option<DateTime<Utc>>,
    offline: bool,
    realtime_offline: bool,
    fetch_latency: HashMap<Uuid, Duration>,
}

impl Store {
    /// Strictly increasing server clock
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn members_of(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(|p| p.user_id)
            .collect()
    }

    fn private_between(&self, a: Uuid, b: Uuid) -> Option<&Conversation> {
        self.conversations.values().find(|c| {
            if c.name.is_some() {
                return false;
            }
            let members = self.members_of(c.id);
            members.len() == 2 && members.contains(&a) && members.contains(&b)
        })
    }

    fn ensure_online(&self) -> GatewayResult<()> {
        if self.offline {
            Err(GatewayError::Unavailable("backend offline".into()))
        } else {
            Ok(())
        }
    }

    fn ensure_realtime(&self) -> GatewayResult<()> {
        self.ensure_online()?;
        if self.realtime_offline {
            Err(GatewayError::Unavailable("realtime offline".into()))
        } else {
            Ok(())
        }
    }
}

struct Shared {
    store: Mutex<Store>,
    inserts: SubscriberRegistry<Uuid, Message>,
    broadcasts: SubscriberRegistry<String, BroadcastMessage>,
}

/// Client handle onto an in-process backend
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
    session: Arc<Mutex<Option<Uuid>>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::default()),
                inserts: SubscriberRegistry::new(),
                broadcasts: SubscriberRegistry::new(),
            }),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Another client of the same backend, starting signed out
    pub fn new_client(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates an account and its profile without touching any session
    pub fn register_user(&self, identifier: &str, secret: &str, username: &str) -> GatewayResult<Uuid> {
        let mut store = self.shared.store.lock();
        if store.accounts.contains_key(identifier) {
            return Err(GatewayError::Conflict(format!("{identifier} already registered")));
        }
        let user_id = Uuid::new_v4();
        store.accounts.insert(
            identifier.to_string(),
            Account {
                user_id,
                secret: secret.to_string(),
            },
        );
        store.profiles.insert(
            user_id,
            Profile {
                id: user_id,
                username: username.to_string(),
                avatar_url: None,
            },
        );
        Ok(user_id)
    }

    /// Inserts or replaces a profile row
    pub fn seed_profile(&self, profile: Profile) {
        self.shared.store.lock().profiles.insert(profile.id, profile);
    }

    pub fn set_current_user(&self, user_id: Option<Uuid>) {
        *self.session.lock() = user_id;
    }

    /// Simulates an outage: every call fails with `Unavailable` while offline
    pub fn set_available(&self, available: bool) {
        self.shared.store.lock().offline = !available;
    }

    /// Refuses new realtime subscriptions while unavailable; requests still
    /// succeed
    pub fn set_realtime_available(&self, available: bool) {
        self.shared.store.lock().realtime_offline = !available;
    }

    /// Delays every history fetch of `conversation_id`
    pub fn set_fetch_latency(&self, conversation_id: Uuid, latency: Duration) {
        self.shared
            .store
            .lock()
            .fetch_latency
            .insert(conversation_id, latency);
    }

    /// Inserts a message on behalf of `sender_id`, bypassing outages
    pub fn post_as(&self, sender_id: Uuid, conversation_id: Uuid, content: &str) -> GatewayResult<Message> {
        self.store_message(NewMessage {
            conversation_id,
            sender_id,
            content: content.to_string(),
        })
    }

    /// Publishes on a broadcast topic, bypassing outages
    pub fn emit_broadcast(&self, topic: &str, event: &str, payload: Value) {
        let topic = topic.to_string();
        self.shared.broadcasts.broadcast(
            &topic,
            BroadcastMessage {
                topic: topic.clone(),
                event: event.to_string(),
                payload,
            },
        );
    }

    /// Delivers a message to insert subscribers again, as a replaying
    /// realtime service would
    pub fn redeliver(&self, message: &Message) {
        self.shared
            .inserts
            .broadcast(&message.conversation_id, message.clone());
    }

    /// Drops every realtime channel of a conversation as if the socket died
    pub fn drop_realtime(&self, conversation_id: Uuid) {
        let inserts = self
            .shared
            .inserts
            .drop_channel(&conversation_id, "realtime channel closed");
        let broadcasts = self
            .shared
            .broadcasts
            .drop_channel(&composing_topic(conversation_id), "realtime channel closed");
        debug!(%conversation_id, inserts, broadcasts, "dropped realtime channels");
    }

    pub fn insert_subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.shared.inserts.subscriber_count(&conversation_id)
    }

    pub fn broadcast_subscriber_count(&self, topic: &str) -> usize {
        self.shared.broadcasts.subscriber_count(&topic.to_string())
    }

    pub fn conversation_count(&self) -> usize {
        self.shared.store.lock().conversations.len()
    }

    pub fn participants_of(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.shared.store.lock().members_of(conversation_id)
    }

    pub fn messages_in(&self, conversation_id: Uuid) -> Vec<Message> {
        self.shared
            .store
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Stored blob bytes and content type
    pub fn blob(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.shared.store.lock().blobs.get(path).cloned()
    }

    fn store_message(&self, new: NewMessage) -> GatewayResult<Message> {
        let message = {
            let mut store = self.shared.store.lock();
            if !store.conversations.contains_key(&new.conversation_id) {
                return Err(GatewayError::NotFound);
            }
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: new.conversation_id,
                sender_id: new.sender_id,
                content: new.content,
                created_at: store.next_timestamp(),
            };
            store.messages.push(message.clone());
            message
        };

        self.shared
            .inserts
            .broadcast(&message.conversation_id, message.clone());
        Ok(message)
    }

    fn online(&self) -> GatewayResult<()> {
        self.shared.store.lock().ensure_online()
    }

    fn realtime_online(&self) -> GatewayResult<()> {
        self.shared.store.lock().ensure_realtime()
    }
}

#[async_trait]
impl AuthApi for InMemoryBackend {
    async fn sign_in(&self, identifier: &str, secret: &str) -> GatewayResult<AuthSession> {
        let user_id = {
            let store = self.shared.store.lock();
            store.ensure_online()?;
            match store.accounts.get(identifier) {
                Some(account) if account.secret == secret => account.user_id,
                _ => return Err(GatewayError::Unauthorized),
            }
        };

        *self.session.lock() = Some(user_id);
        Ok(AuthSession {
            user_id,
            access_token: Some(format!("memory-{user_id}")),
        })
    }

    async fn sign_up(
        &self,
        identifier: &str,
        secret: &str,
        metadata: Value,
    ) -> GatewayResult<AuthSession> {
        self.online()?;
        let username = metadata
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or(identifier);
        let user_id = self.register_user(identifier, secret, username)?;

        *self.session.lock() = Some(user_id);
        Ok(AuthSession {
            user_id,
            access_token: Some(format!("memory-{user_id}")),
        })
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.session.lock().take();
        Ok(())
    }

    async fn current_user(&self) -> GatewayResult<Option<Uuid>> {
        self.online()?;
        Ok(*self.session.lock())
    }
}

#[async_trait]
impl RecordStore for InMemoryBackend {
    async fn fetch_messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<MessageWithSender>> {
        let latency = {
            let store = self.shared.store.lock();
            store.ensure_online()?;
            store.fetch_latency.get(&conversation_id).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let store = self.shared.store.lock();
        let mut rows: Vec<MessageWithSender> = store
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| MessageWithSender {
                message: m.clone(),
                sender: store.profiles.get(&m.sender_id).map(|p| SenderProfile {
                    username: p.username.clone(),
                    avatar_url: p.avatar_url.clone(),
                }),
            })
            .collect();
        rows.sort_by_key(|row| row.message.created_at);
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> GatewayResult<Message> {
        self.online()?;
        self.store_message(message)
    }

    async fn list_conversations(&self, user_id: Uuid) -> GatewayResult<Vec<ConversationWithMembers>> {
        let store = self.shared.store.lock();
        store.ensure_online()?;

        let mut result: Vec<ConversationWithMembers> = store
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| store.conversations.get(&p.conversation_id))
            .map(|conversation| ConversationWithMembers {
                conversation: conversation.clone(),
                members: store
                    .members_of(conversation.id)
                    .iter()
                    .filter_map(|id| store.profiles.get(id).cloned())
                    .collect(),
            })
            .collect();
        result.sort_by(|a, b| b.conversation.created_at.cmp(&a.conversation.created_at));
        Ok(result)
    }

    async fn find_private_conversation(&self, a: Uuid, b: Uuid) -> GatewayResult<Option<Conversation>> {
        let store = self.shared.store.lock();
        store.ensure_online()?;
        Ok(store.private_between(a, b).cloned())
    }

    async fn create_conversation(&self, new: NewConversation) -> GatewayResult<Conversation> {
        let mut store = self.shared.store.lock();
        store.ensure_online()?;

        if new.participants.len() < 2 {
            return Err(GatewayError::Rejected {
                status: 400,
                body: "a conversation needs at least two participants".into(),
            });
        }
        if new.name.is_none() {
            if new.participants.len() != 2 {
                return Err(GatewayError::Rejected {
                    status: 400,
                    body: "a private conversation has exactly two participants".into(),
                });
            }
            if let Some(existing) = store.private_between(new.participants[0], new.participants[1]) {
                return Err(GatewayError::Conflict(format!(
                    "private conversation {} already exists",
                    existing.id
                )));
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            name: new.name,
            created_at: store.next_timestamp(),
        };
        store
            .conversations
            .insert(conversation.id, conversation.clone());
        for user_id in new.participants {
            store.participants.push(Participant {
                conversation_id: conversation.id,
                user_id,
            });
        }

        debug!(conversation_id = %conversation.id, "created conversation");
        Ok(conversation)
    }

    async fn fetch_profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>> {
        let store = self.shared.store.lock();
        store.ensure_online()?;
        Ok(ids
            .iter()
            .filter_map(|id| store.profiles.get(id).cloned())
            .collect())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> GatewayResult<Profile> {
        let mut store = self.shared.store.lock();
        store.ensure_online()?;
        let profile = store.profiles.get_mut(&id).ok_or(GatewayError::NotFound)?;
        if let Some(username) = update.username {
            profile.username = username;
        }
        if let Some(avatar_url) = update.avatar_url {
            profile.avatar_url = Some(avatar_url);
        }
        Ok(profile.clone())
    }
}

#[async_trait]
impl RealtimeApi for InMemoryBackend {
    async fn subscribe_inserts(&self, conversation_id: Uuid) -> GatewayResult<Subscription<Message>> {
        self.realtime_online()?;
        let registry = self.shared.inserts.clone();
        let (subscriber_id, rx) = registry.add_subscriber(conversation_id);
        Ok(Subscription::new(rx, move || {
            registry.remove_subscriber(&conversation_id, subscriber_id)
        }))
    }

    async fn subscribe_broadcast(&self, topic: &str) -> GatewayResult<Subscription<BroadcastMessage>> {
        self.realtime_online()?;
        let registry = self.shared.broadcasts.clone();
        let topic = topic.to_string();
        let (subscriber_id, rx) = registry.add_subscriber(topic.clone());
        Ok(Subscription::new(rx, move || {
            registry.remove_subscriber(&topic, subscriber_id)
        }))
    }

    async fn broadcast(&self, topic: &str, event: &str, payload: Value) -> GatewayResult<()> {
        self.online()?;
        self.emit_broadcast(topic, event, payload);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> GatewayResult<String> {
        let mut store = self.shared.store.lock();
        store.ensure_online()?;
        if !upsert && store.blobs.contains_key(path) {
            return Err(GatewayError::Conflict(format!("{path} already exists")));
        }
        store
            .blobs
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://avatars/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelEvent;

    fn pair(backend: &InMemoryBackend) -> (Uuid, Uuid) {
        let a = backend.register_user("alice", "k1", "alice").unwrap();
        let b = backend.register_user("bob", "k2", "bob").unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_private_pair_is_unique_in_either_order() {
        let backend = InMemoryBackend::new();
        let (a, b) = pair(&backend);

        let created = backend
            .create_conversation(NewConversation::private(a, b))
            .await
            .unwrap();
        let err = backend
            .create_conversation(NewConversation::private(b, a))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(
            backend.find_private_conversation(b, a).await.unwrap(),
            Some(created)
        );
        assert_eq!(backend.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_timestamps_are_strictly_increasing() {
        let backend = InMemoryBackend::new();
        let (a, b) = pair(&backend);
        let conversation = backend
            .create_conversation(NewConversation::private(a, b))
            .await
            .unwrap();

        let mut previous = None;
        for i in 0..50 {
            let message = backend.post_as(a, conversation.id, &i.to_string()).unwrap();
            if let Some(prev) = previous {
                assert!(message.created_at > prev);
            }
            previous = Some(message.created_at);
        }
    }

    #[tokio::test]
    async fn test_insert_fans_out_and_drop_unsubscribes() {
        let backend = InMemoryBackend::new();
        let (a, b) = pair(&backend);
        let conversation = backend
            .create_conversation(NewConversation::private(a, b))
            .await
            .unwrap();

        let mut subscription = backend.subscribe_inserts(conversation.id).await.unwrap();
        assert_eq!(backend.insert_subscriber_count(conversation.id), 1);

        let sent = backend.post_as(b, conversation.id, "hello").unwrap();
        assert_eq!(subscription.next().await, Some(ChannelEvent::Payload(sent)));

        drop(subscription);
        assert_eq!(backend.insert_subscriber_count(conversation.id), 0);
    }

    #[tokio::test]
    async fn test_offline_rejects_calls() {
        let backend = InMemoryBackend::new();
        let (a, _) = pair(&backend);
        backend.set_available(false);

        assert!(matches!(
            backend.list_conversations(a).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(backend.subscribe_inserts(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_clients_hold_separate_sessions() {
        let backend = InMemoryBackend::new();
        let (a, _) = pair(&backend);
        let other = backend.new_client();

        backend.sign_in("alice", "k1").await.unwrap();

        assert_eq!(backend.current_user().await.unwrap(), Some(a));
        assert_eq!(other.current_user().await.unwrap(), None);
        assert_eq!(
            other.sign_in("alice", "wrong").await,
            Err(GatewayError::Unauthorized)
        );
    }
}
