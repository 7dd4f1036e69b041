//! Ordered feed content for one conversation
//!
//! Confirmed messages are kept sorted by `(created_at, id)` and are unique by
//! id. Pending entries (optimistic sends awaiting confirmation) follow them in
//! submission order and are keyed by a client correlation id.

use crate::models::{AuthorDisplay, Message};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedEntry {
    pub message: Message,
    pub author: AuthorDisplay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub correlation_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub author: AuthorDisplay,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    confirmed: Vec<ConfirmedEntry>,
    ids: HashSet<Uuid>,
    pending: Vec<PendingEntry>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn confirmed(&self) -> &[ConfirmedEntry] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.ids.clear();
        self.pending.clear();
    }

    /// Merges a server-confirmed message; returns false if it was already known
    ///
    /// A message authored by `self_id` adopts the oldest pending entry with
    /// the same content, so the optimistic copy disappears as the confirmed
    /// one lands.
    pub fn merge_confirmed(&mut self, message: Message, author: AuthorDisplay, self_id: Option<Uuid>) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        if self_id == Some(message.sender_id) {
            self.take_matching_pending(&message);
        }
        self.insert_sorted(message, author);
        true
    }

    pub fn push_pending(&mut self, entry: PendingEntry) {
        self.pending.push(entry);
    }

    /// Replaces the pending entry `correlation_id` with its confirmed message
    ///
    /// If realtime delivered the message first it already adopted a pending
    /// entry with the same content; whichever entry remains stands in for a
    /// send still in flight and is left alone.
    pub fn confirm(&mut self, correlation_id: Uuid, message: Message, author: AuthorDisplay) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        if self.take_pending(correlation_id).is_none() {
            self.take_matching_pending(&message);
        }
        self.insert_sorted(message, author);
        true
    }

    /// Drops the pending entry of a failed send and returns it
    pub fn fail(&mut self, correlation_id: Uuid, content: &str, sender_id: Uuid) -> Option<PendingEntry> {
        self.take_pending(correlation_id).or_else(|| {
            let index = self
                .pending
                .iter()
                .position(|p| p.sender_id == sender_id && p.content == content)?;
            Some(self.pending.remove(index))
        })
    }

    fn take_pending(&mut self, correlation_id: Uuid) -> Option<PendingEntry> {
        let index = self
            .pending
            .iter()
            .position(|p| p.correlation_id == correlation_id)?;
        Some(self.pending.remove(index))
    }

    fn take_matching_pending(&mut self, message: &Message) -> Option<PendingEntry> {
        let index = self.pending.iter().position(|p| {
            p.sender_id == message.sender_id
                && p.conversation_id == message.conversation_id
                && p.content == message.content
        })?;
        Some(self.pending.remove(index))
    }

    fn insert_sorted(&mut self, message: Message, author: AuthorDisplay) {
        let key = message.sort_key();
        let index = self
            .confirmed
            .partition_point(|entry| entry.message.sort_key() < key);
        self.ids.insert(message.id);
        self.confirmed.insert(index, ConfirmedEntry { message, author });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(conversation: Uuid, sender: Uuid, content: &str, secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: conversation,
            sender_id: sender,
            content: content.to_string(),
            created_at: at(secs),
        }
    }

    fn pending(conversation: Uuid, sender: Uuid, content: &str) -> PendingEntry {
        PendingEntry {
            correlation_id: Uuid::new_v4(),
            conversation_id: conversation,
            sender_id: sender,
            content: content.to_string(),
            author: AuthorDisplay::new("me", None),
            submitted_at: Utc::now(),
        }
    }

    fn contents(store: &MessageStore) -> Vec<&str> {
        store
            .confirmed()
            .iter()
            .map(|e| e.message.content.as_str())
            .collect()
    }

    #[test]
    fn test_merge_is_idempotent_by_id() {
        let (c, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();
        let m = message(c, peer, "hi", 1);

        assert!(store.merge_confirmed(m.clone(), AuthorDisplay::placeholder(), None));
        assert!(!store.merge_confirmed(m.clone(), AuthorDisplay::placeholder(), None));
        assert_eq!(store.confirmed().len(), 1);
    }

    #[test]
    fn test_out_of_order_arrivals_are_sorted() {
        let (c, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();

        for (content, secs) in [("third", 3), ("first", 1), ("second", 2)] {
            store.merge_confirmed(message(c, peer, content, secs), AuthorDisplay::placeholder(), None);
        }

        assert_eq!(contents(&store), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let (c, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();
        let a = message(c, peer, "a", 1);
        let b = message(c, peer, "b", 1);
        let expected = if a.id < b.id { vec!["a", "b"] } else { vec!["b", "a"] };

        store.merge_confirmed(b, AuthorDisplay::placeholder(), None);
        store.merge_confirmed(a, AuthorDisplay::placeholder(), None);

        assert_eq!(contents(&store), expected);
    }

    #[test]
    fn test_realtime_copy_adopts_pending_entry() {
        let (c, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();
        let entry = pending(c, me, "hello");
        let correlation = entry.correlation_id;
        store.push_pending(entry);

        let confirmed = message(c, me, "hello", 1);
        store.merge_confirmed(confirmed.clone(), AuthorDisplay::new("me", None), Some(me));
        assert!(store.pending().is_empty());

        // the insert response arriving afterwards changes nothing
        assert!(!store.confirm(correlation, confirmed, AuthorDisplay::new("me", None)));
        assert_eq!(store.confirmed().len(), 1);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_identical_sends_confirmed_out_of_order() {
        let (c, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();
        let first = pending(c, me, "ok");
        let second = pending(c, me, "ok");
        let (first_id, second_id) = (first.correlation_id, second.correlation_id);
        store.push_pending(first);
        store.push_pending(second);

        let m_second = message(c, me, "ok", 1);
        let m_first = message(c, me, "ok", 2);
        let author = AuthorDisplay::new("me", None);

        store.merge_confirmed(m_second.clone(), author.clone(), Some(me));
        assert_eq!(store.confirmed().len() + store.pending().len(), 2);

        store.confirm(second_id, m_second, author.clone());
        assert_eq!(store.confirmed().len() + store.pending().len(), 2);

        store.confirm(first_id, m_first, author);
        assert_eq!(store.confirmed().len(), 2);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_fail_removes_pending() {
        let (c, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MessageStore::new();
        let entry = pending(c, me, "lost");
        let correlation = entry.correlation_id;
        store.push_pending(entry);

        let failed = store.fail(correlation, "lost", me).unwrap();
        assert_eq!(failed.content, "lost");
        assert!(store.is_empty());
    }
}
