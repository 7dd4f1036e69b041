use crate::models::ChannelEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Unique identifier for a realtime subscriber
///
/// Each subscription gets its own id when it registers, so it can be removed
/// precisely when it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber<T> {
    id: SubscriberId,
    sender: UnboundedSender<ChannelEvent<T>>,
}

/// Fan-out registry of realtime subscribers keyed by channel
///
/// Removal is synchronous so it can run from a `Drop` impl.
pub struct SubscriberRegistry<K, T> {
    // channel key -> list of subscribers
    inner: Arc<RwLock<HashMap<K, Vec<Subscriber<T>>>>>,
}

impl<K, T> Clone for SubscriberRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T> Default for SubscriberRegistry<K, T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, T> SubscriberRegistry<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber on `key`
    ///
    /// Returns the subscriber id (used for removal) and the receiving end of
    /// its channel.
    pub fn add_subscriber(&self, key: K) -> (SubscriberId, UnboundedReceiver<ChannelEvent<T>>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write();
        let subscribers = guard.entry(key.clone()).or_default();
        subscribers.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            ?subscriber_id,
            channel = ?key,
            total = subscribers.len(),
            "added realtime subscriber"
        );

        (subscriber_id, rx)
    }

    /// Remove one subscriber; empty channels are dropped from the map
    pub fn remove_subscriber(&self, key: &K, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write();

        if let Some(subscribers) = guard.get_mut(key) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != subscriber_id);

            if before != subscribers.len() {
                tracing::debug!(
                    ?subscriber_id,
                    channel = ?key,
                    remaining = subscribers.len(),
                    "removed realtime subscriber"
                );
            }

            if subscribers.is_empty() {
                guard.remove(key);
            }
        }
    }

    /// Deliver `item` to every subscriber of `key`, pruning closed receivers
    pub fn broadcast(&self, key: &K, item: T) {
        let mut guard = self.inner.write();
        if let Some(subscribers) = guard.get_mut(key) {
            let before = subscribers.len();

            subscribers
                .retain(|subscriber| subscriber.sender.send(ChannelEvent::Payload(item.clone())).is_ok());

            let after = subscribers.len();
            if before != after {
                tracing::debug!(
                    channel = ?key,
                    pruned = before - after,
                    active = after,
                    "pruned closed realtime subscribers"
                );
            }
            if subscribers.is_empty() {
                guard.remove(key);
            }
        }
    }

    /// Tell every subscriber of `key` that the channel is gone and forget them
    pub fn drop_channel(&self, key: &K, reason: &str) -> usize {
        let removed = self.inner.write().remove(key).unwrap_or_default();
        for subscriber in &removed {
            let _ = subscriber.sender.send(ChannelEvent::Lost(reason.to_string()));
        }
        removed.len()
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner.read().get(key).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_only_matching_channel() {
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (_a, mut rx_a) = registry.add_subscriber("a");
        let (_b, mut rx_b) = registry.add_subscriber("b");

        registry.broadcast(&"a", 1);

        assert_eq!(rx_a.recv().await, Some(ChannelEvent::Payload(1)));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_remove_subscriber_cleans_empty_channel() {
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (first, _rx1) = registry.add_subscriber("a");
        let (second, _rx2) = registry.add_subscriber("a");
        assert_eq!(registry.subscriber_count(&"a"), 2);

        registry.remove_subscriber(&"a", first);
        assert_eq!(registry.subscriber_count(&"a"), 1);

        registry.remove_subscriber(&"a", second);
        assert_eq!(registry.subscriber_count(&"a"), 0);
        assert!(registry.inner.read().is_empty());
    }

    #[test]
    fn test_broadcast_prunes_closed_receivers() {
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (_id, rx) = registry.add_subscriber("a");
        drop(rx);

        registry.broadcast(&"a", 1);
        assert_eq!(registry.subscriber_count(&"a"), 0);
    }

    #[tokio::test]
    async fn test_drop_channel_notifies_loss() {
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (_id, mut rx) = registry.add_subscriber("a");

        assert_eq!(registry.drop_channel(&"a", "socket closed"), 1);
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Lost("socket closed".to_string()))
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(registry.subscriber_count(&"a"), 0);
    }
}
