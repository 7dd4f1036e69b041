//! Backend gateway contract
//!
//! The hosted backend is consumed through four narrow traits. Controllers
//! hold an `Arc<dyn BackendGateway>`, which is any type implementing all four.

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BroadcastMessage, ChannelEvent, Conversation, ConversationWithMembers, Message,
    MessageWithSender, NewConversation, NewMessage, Profile, ProfileUpdate,
};
use async_trait::async_trait;
use resilience::{with_timeout_result, TimeoutError};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub mod memory;
pub mod realtime;
pub mod registry;
pub mod rest;

pub use memory::InMemoryBackend;
pub use registry::{SubscriberId, SubscriberRegistry};
pub use rest::RestBackend;

/// Authenticated session returned by sign-in and sign-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
    /// Bearer token, absent when the backend defers the session
    /// (e.g. pending confirmation)
    pub access_token: Option<String>,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in(&self, identifier: &str, secret: &str) -> GatewayResult<AuthSession>;

    async fn sign_up(
        &self,
        identifier: &str,
        secret: &str,
        metadata: Value,
    ) -> GatewayResult<AuthSession>;

    async fn sign_out(&self) -> GatewayResult<()>;

    /// Identity of the current session, `None` when signed out
    async fn current_user(&self) -> GatewayResult<Option<Uuid>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// History of a conversation in ascending `created_at` order, joined with
    /// each sender's profile
    async fn fetch_messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<MessageWithSender>>;

    async fn insert_message(&self, message: NewMessage) -> GatewayResult<Message>;

    /// Conversations `user_id` participates in, joined with every
    /// participant's profile
    async fn list_conversations(&self, user_id: Uuid) -> GatewayResult<Vec<ConversationWithMembers>>;

    /// Existing private conversation between `a` and `b`, in either order
    async fn find_private_conversation(&self, a: Uuid, b: Uuid) -> GatewayResult<Option<Conversation>>;

    /// Creates the conversation and all of its participant rows, or nothing
    async fn create_conversation(&self, new: NewConversation) -> GatewayResult<Conversation>;

    async fn fetch_profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>>;

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> GatewayResult<Profile>;
}

#[async_trait]
pub trait RealtimeApi: Send + Sync {
    /// Insert notifications on `messages` filtered by conversation
    async fn subscribe_inserts(&self, conversation_id: Uuid) -> GatewayResult<Subscription<Message>>;

    async fn subscribe_broadcast(&self, topic: &str) -> GatewayResult<Subscription<BroadcastMessage>>;

    async fn broadcast(&self, topic: &str, event: &str, payload: Value) -> GatewayResult<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `path` and returns the stored path
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> GatewayResult<String>;

    fn public_url(&self, path: &str) -> String;
}

/// Everything the chat core needs from the backend
pub trait BackendGateway: AuthApi + RecordStore + RealtimeApi + BlobStore {}

impl<T> BackendGateway for T where T: AuthApi + RecordStore + RealtimeApi + BlobStore + ?Sized {}

type Release = Box<dyn FnOnce() + Send>;

/// Live realtime subscription
///
/// Yields [`ChannelEvent`]s until the channel is lost or the subscription is
/// dropped. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: UnboundedReceiver<ChannelEvent<T>>,
    release: Option<Release>,
}

impl<T> Subscription<T> {
    pub fn new<F>(rx: UnboundedReceiver<ChannelEvent<T>>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Next event; `None` once the producing side is gone
    pub async fn next(&mut self) -> Option<ChannelEvent<T>> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Bounds a gateway call, reporting expiry as [`GatewayError::Timeout`]
pub async fn bounded<T, F>(limit: Duration, call: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match with_timeout_result(limit, call).await {
        Ok(value) => Ok(value),
        Err(TimeoutError::Failed(e)) => Err(e),
        Err(TimeoutError::Elapsed(after)) => Err(GatewayError::Timeout(after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_drop_releases_once() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let (tx, rx) = unbounded_channel::<ChannelEvent<u32>>();

        let mut subscription = Subscription::new(rx, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        tx.send(ChannelEvent::Payload(7)).unwrap();
        assert_eq!(subscription.next().await, Some(ChannelEvent::Payload(7)));

        drop(subscription);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_maps_elapsed() {
        let result: GatewayResult<()> = bounded(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(GatewayError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_bounded_keeps_gateway_error() {
        let result: GatewayResult<()> =
            bounded(Duration::from_secs(1), async { Err(GatewayError::NotFound) }).await;
        assert_eq!(result, Err(GatewayError::NotFound));
    }
}
