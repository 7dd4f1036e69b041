//! # Conversation feed controller
//!
//! Owns the live view of one open conversation: ordered history, realtime
//! merge, optimistic sends, the compose draft and the peer composing
//! indicator.
//!
//! ## Lifecycle
//!
//! `Idle → Loading → Ready ⇄ Sending`, with `Error` reachable from `Loading`
//! and `Sending`. Opening a conversation bumps a generation counter; every
//! asynchronous result is applied only if its generation is still current, so
//! late responses for a conversation the user already left are discarded.
//!
//! ## Subscriptions
//!
//! Both realtime subscriptions (message inserts and the composing topic) are
//! acquired before history is fetched, so an insert racing the fetch is still
//! delivered and merged by id. While history is loading they are parked in
//! the feed state, and the next `open` or `close` drops them on the spot; the
//! superseded load is cancelled as well. Once loaded they are owned by one
//! background task per open conversation. Switching conversations aborts that
//! task and waits for it, which releases the old subscriptions before anything
//! else happens.

use super::composing::{ComposingIndicator, ComposingThrottle};
use super::message_store::{MessageStore, PendingEntry};
use crate::context::ChatContext;
use crate::error::{AppError, AppResult, GatewayError, GatewayResult};
use crate::gateway::{bounded, Subscription};
use crate::models::{
    composing_topic, AuthorDisplay, BroadcastMessage, ChannelEvent, ComposingSignal, Message,
    MessageWithSender, NewMessage, Profile, COMPOSING_EVENT,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use resilience::with_retry;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Channels = (Subscription<Message>, Subscription<BroadcastMessage>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPhase {
    Idle,
    Loading,
    Ready,
    /// At least one send is in flight; further sends are allowed
    Sending,
    Error(AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedItemKey {
    Confirmed(Uuid),
    /// Correlation id of an optimistic send
    Pending(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub key: FeedItemKey,
    pub sender_id: Uuid,
    pub author: AuthorDisplay,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_own: bool,
    pub pending: bool,
}

/// Read-only snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub conversation_id: Option<Uuid>,
    pub phase: FeedPhase,
    pub items: Vec<FeedItem>,
    pub is_composing: bool,
    pub draft: String,
    pub recoverable_input: Option<String>,
}

struct FeedState {
    generation: u64,
    conversation_id: Option<Uuid>,
    self_id: Option<Uuid>,
    phase: FeedPhase,
    /// History of the current conversation has been fetched
    loaded: bool,
    store: MessageStore,
    composing: ComposingIndicator,
    throttle: ComposingThrottle,
    draft: String,
    recoverable_input: Option<String>,
    in_flight: usize,
    /// Subscriptions of an open still fetching history
    loading: Option<Channels>,
    task: Option<JoinHandle<()>>,
}

impl FeedState {
    fn reset(&mut self, conversation_id: Option<Uuid>, self_id: Option<Uuid>, phase: FeedPhase) {
        self.conversation_id = conversation_id;
        self.self_id = self_id;
        self.phase = phase;
        self.loaded = false;
        self.store.clear();
        self.composing.clear();
        self.throttle.reset();
        self.draft.clear();
        self.recoverable_input = None;
        self.in_flight = 0;
    }

    fn settled_phase(&self) -> FeedPhase {
        if self.in_flight > 0 {
            FeedPhase::Sending
        } else {
            FeedPhase::Ready
        }
    }
}

struct FeedShared {
    ctx: ChatContext,
    state: Mutex<FeedState>,
    version: watch::Sender<u64>,
    /// Latest generation, watched by in-flight opens
    current: watch::Sender<u64>,
}

pub struct FeedController {
    shared: Arc<FeedShared>,
}

enum ChannelStep {
    Insert(Option<ChannelEvent<Message>>),
    Broadcast(Option<ChannelEvent<BroadcastMessage>>),
    ComposingExpired,
}

fn into_payload<T>(event: Option<ChannelEvent<T>>) -> Result<T, String> {
    match event {
        Some(ChannelEvent::Payload(payload)) => Ok(payload),
        Some(ChannelEvent::Lost(reason)) => Err(reason),
        None => Err("channel closed".to_string()),
    }
}

async fn stop_task(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
        // cancellation error expected
        let _ = task.await;
    }
}

impl FeedController {
    pub fn new(ctx: ChatContext) -> Self {
        let state = FeedState {
            generation: 0,
            conversation_id: None,
            self_id: None,
            phase: FeedPhase::Idle,
            loaded: false,
            store: MessageStore::new(),
            composing: ComposingIndicator::new(ctx.config.composing_ttl),
            throttle: ComposingThrottle::new(ctx.config.composing_throttle),
            draft: String::new(),
            recoverable_input: None,
            in_flight: 0,
            loading: None,
            task: None,
        };
        let (version, _) = watch::channel(0);
        let (current, _) = watch::channel(0);

        Self {
            shared: Arc::new(FeedShared {
                ctx,
                state: Mutex::new(state),
                version,
                current,
            }),
        }
    }

    /// Opens `conversation_id`, replacing whatever was open
    ///
    /// Does nothing beyond recording the selection while the identity is
    /// unresolved. Returns `FetchFailed` when the subscriptions or the history
    /// could not be obtained; the same error is left in the phase.
    pub async fn open(&self, conversation_id: Uuid) -> AppResult<()> {
        let self_id = self.shared.ctx.session.user_id();
        let (generation, previous, parked) = {
            let mut state = self.shared.state.lock();
            let generation = self.shared.advance(&mut state);
            let phase = if self_id.is_some() {
                FeedPhase::Loading
            } else {
                FeedPhase::Idle
            };
            state.reset(Some(conversation_id), self_id, phase);
            (generation, state.task.take(), state.loading.take())
        };
        drop(parked);
        self.shared.notify();
        stop_task(previous).await;

        let Some(self_id) = self_id else {
            debug!(%conversation_id, "identity unresolved, feed not loaded");
            return Ok(());
        };
        debug!(%conversation_id, generation, "opening conversation");

        let outcome = tokio::select! {
            outcome = self.shared.load(generation, conversation_id) => outcome,
            _ = self.shared.superseded(generation) => Ok(None),
        };
        let rows = match outcome {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                debug!(%conversation_id, generation, "open superseded");
                return Ok(());
            }
            Err(e) => return self.shared.fail_open(generation, conversation_id, e),
        };
        let entries = self.shared.resolve_history(rows).await;
        let count = entries.len();

        let started = {
            let mut state = self.shared.state.lock();
            let parked = if state.generation == generation {
                state.loading.take()
            } else {
                None
            };
            if let Some((inserts, broadcasts)) = parked {
                for (message, author) in entries {
                    state.store.merge_confirmed(message, author, Some(self_id));
                }
                state.loaded = true;
                state.phase = state.settled_phase();
                state.task = Some(tokio::spawn(run_channels(
                    self.shared.clone(),
                    generation,
                    conversation_id,
                    self_id,
                    inserts,
                    broadcasts,
                )));
                true
            } else {
                false
            }
        };

        if started {
            self.shared.notify();
            debug!(%conversation_id, messages = count, "conversation ready");
        } else {
            debug!(%conversation_id, generation, "discarding stale history");
        }
        Ok(())
    }

    /// Releases the open conversation and returns to `Idle`
    pub async fn close(&self) {
        let (previous, parked) = {
            let mut state = self.shared.state.lock();
            self.shared.advance(&mut state);
            state.reset(None, None, FeedPhase::Idle);
            (state.task.take(), state.loading.take())
        };
        drop(parked);
        self.shared.notify();
        stop_task(previous).await;
    }

    /// Re-opens the current conversation
    pub async fn reload(&self) -> AppResult<()> {
        let current = self.shared.state.lock().conversation_id;
        match current {
            Some(conversation_id) => self.open(conversation_id).await,
            None => Ok(()),
        }
    }

    /// Sends `content` to the open conversation
    ///
    /// Returns `Ok(None)` without touching the network when the trimmed
    /// content is empty, the identity is unresolved or nothing is open. The
    /// draft is cleared on submit and restored if the send fails.
    pub async fn send(&self, content: &str) -> AppResult<Option<Message>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let Some(sender_id) = self.shared.ctx.session.user_id() else {
            return Ok(None);
        };
        let author = self.shared.ctx.profiles.resolve(sender_id).await;
        let correlation_id = Uuid::new_v4();

        let prepared = {
            let mut state = self.shared.state.lock();
            match state.conversation_id {
                Some(conversation_id) if state.loaded => {
                    state.store.push_pending(PendingEntry {
                        correlation_id,
                        conversation_id,
                        sender_id,
                        content: content.to_string(),
                        author: author.clone(),
                        submitted_at: Utc::now(),
                    });
                    state.draft.clear();
                    state.recoverable_input = None;
                    state.in_flight += 1;
                    // a lost channel stays visible until it is restored
                    if !matches!(state.phase, FeedPhase::Error(AppError::SubscriptionLost(_))) {
                        state.phase = FeedPhase::Sending;
                    }
                    Some((conversation_id, state.generation))
                }
                _ => None,
            }
        };
        let Some((conversation_id, generation)) = prepared else {
            return Ok(None);
        };
        self.shared.notify();

        let result = bounded(
            self.shared.ctx.config.request_timeout,
            self.shared.ctx.gateway.insert_message(NewMessage {
                conversation_id,
                sender_id,
                content: content.to_string(),
            }),
        )
        .await;

        match result {
            Ok(message) => {
                self.shared.update_current(generation, |state| {
                    state.store.confirm(correlation_id, message.clone(), author);
                    state.in_flight = state.in_flight.saturating_sub(1);
                    if state.phase == FeedPhase::Sending {
                        state.phase = state.settled_phase();
                    }
                });
                debug!(%conversation_id, message_id = %message.id, "message sent");
                Ok(Some(message))
            }
            Err(e) => {
                warn!(%conversation_id, error = %e, "send failed");
                let error = AppError::send(e);
                self.shared.update_current(generation, |state| {
                    state.store.fail(correlation_id, content, sender_id);
                    state.in_flight = state.in_flight.saturating_sub(1);
                    if state.draft.is_empty() {
                        state.draft = content.to_string();
                    }
                    state.recoverable_input = Some(content.to_string());
                    state.phase = FeedPhase::Error(error.clone());
                });
                Err(error)
            }
        }
    }

    /// Stores the compose draft and signals composing for non-blank text
    pub async fn update_draft(&self, text: &str) {
        self.shared.state.lock().draft = text.to_string();
        self.shared.notify();
        if !text.trim().is_empty() {
            self.notify_composing().await;
        }
    }

    /// Broadcasts a composing signal, at most once per throttle window
    ///
    /// Delivery failures are logged and otherwise ignored.
    pub async fn notify_composing(&self) {
        let Some(user_id) = self.shared.ctx.session.user_id() else {
            return;
        };
        let conversation_id = {
            let mut state = self.shared.state.lock();
            if !state.loaded {
                return;
            }
            let Some(conversation_id) = state.conversation_id else {
                return;
            };
            if !state.throttle.try_acquire(Instant::now()) {
                return;
            }
            conversation_id
        };

        let sent = bounded(
            self.shared.ctx.config.request_timeout,
            self.shared.ctx.gateway.broadcast(
                &composing_topic(conversation_id),
                COMPOSING_EVENT,
                json!({ "user_id": user_id }),
            ),
        )
        .await;
        if let Err(e) = sent {
            debug!(%conversation_id, error = %e, "composing signal not delivered");
        }
    }

    /// Leaves `Error`, back to the settled phase if history is loaded
    pub fn dismiss_error(&self) {
        {
            let mut state = self.shared.state.lock();
            if !matches!(state.phase, FeedPhase::Error(_)) {
                return;
            }
            state.phase = if state.loaded {
                state.settled_phase()
            } else {
                FeedPhase::Idle
            };
        }
        self.shared.notify();
    }

    pub fn phase(&self) -> FeedPhase {
        self.shared.state.lock().phase.clone()
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.shared.state.lock().conversation_id
    }

    pub fn draft(&self) -> String {
        self.shared.state.lock().draft.clone()
    }

    /// Content of the last failed send
    pub fn recoverable_input(&self) -> Option<String> {
        self.shared.state.lock().recoverable_input.clone()
    }

    pub fn is_composing(&self) -> bool {
        self.shared.state.lock().composing.is_active(Instant::now())
    }

    /// Version counter bumped on every observable change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub fn snapshot(&self) -> FeedView {
        let state = self.shared.state.lock();
        let self_id = state.self_id;

        let confirmed = state.store.confirmed().iter().map(|entry| FeedItem {
            key: FeedItemKey::Confirmed(entry.message.id),
            sender_id: entry.message.sender_id,
            author: entry.author.clone(),
            content: entry.message.content.clone(),
            timestamp: entry.message.created_at,
            is_own: self_id == Some(entry.message.sender_id),
            pending: false,
        });
        let pending = state.store.pending().iter().map(|entry| FeedItem {
            key: FeedItemKey::Pending(entry.correlation_id),
            sender_id: entry.sender_id,
            author: entry.author.clone(),
            content: entry.content.clone(),
            timestamp: entry.submitted_at,
            is_own: true,
            pending: true,
        });

        FeedView {
            conversation_id: state.conversation_id,
            phase: state.phase.clone(),
            items: confirmed.chain(pending).collect(),
            is_composing: state.composing.is_active(Instant::now()),
            draft: state.draft.clone(),
            recoverable_input: state.recoverable_input.clone(),
        }
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        let (task, parked) = {
            let mut state = self.shared.state.lock();
            (state.task.take(), state.loading.take())
        };
        drop(parked);
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl FeedShared {
    fn notify(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    /// Applies `f` if `generation` is still current, then notifies observers
    fn update_current<R>(&self, generation: u64, f: impl FnOnce(&mut FeedState) -> R) -> Option<R> {
        let result = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return None;
            }
            f(&mut state)
        };
        self.notify();
        Some(result)
    }

    /// Starts a new generation, cancelling any in-flight open
    fn advance(&self, state: &mut FeedState) -> u64 {
        state.generation += 1;
        self.current.send_replace(state.generation);
        state.generation
    }

    /// Resolves once `generation` is no longer the latest
    async fn superseded(&self, generation: u64) {
        let mut current = self.current.subscribe();
        // the sender lives as long as `self`
        let _ = current.wait_for(|latest| *latest != generation).await;
    }

    /// Subscribes, parks the channels and fetches history
    ///
    /// `Ok(None)` when the open was superseded before its channels could be
    /// parked.
    async fn load(
        &self,
        generation: u64,
        conversation_id: Uuid,
    ) -> GatewayResult<Option<Vec<MessageWithSender>>> {
        let channels = self.subscribe(conversation_id).await?;
        if !self.park(generation, channels) {
            return Ok(None);
        }
        let rows = bounded(
            self.ctx.config.request_timeout,
            self.ctx.gateway.fetch_messages(conversation_id),
        )
        .await?;
        Ok(Some(rows))
    }

    fn park(&self, generation: u64, channels: Channels) -> bool {
        let rejected = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.loading = Some(channels);
                None
            } else {
                Some(channels)
            }
        };
        rejected.is_none()
    }

    async fn subscribe(&self, conversation_id: Uuid) -> GatewayResult<Channels> {
        let timeout = self.ctx.config.request_timeout;
        let inserts = bounded(timeout, self.ctx.gateway.subscribe_inserts(conversation_id)).await?;
        let broadcasts = bounded(
            timeout,
            self.ctx
                .gateway
                .subscribe_broadcast(&composing_topic(conversation_id)),
        )
        .await?;
        Ok((inserts, broadcasts))
    }

    fn fail_open(
        &self,
        generation: u64,
        conversation_id: Uuid,
        e: GatewayError,
    ) -> AppResult<()> {
        let error = AppError::fetch(e);
        let applied = self.update_current(generation, |state| {
            state.loaded = false;
            state.phase = FeedPhase::Error(error.clone());
            state.loading.take()
        });
        let Some(parked) = applied else {
            debug!(%conversation_id, "ignoring failure of stale open");
            return Ok(());
        };
        drop(parked);
        warn!(%conversation_id, error = %error, "failed to open conversation");
        Err(error)
    }

    /// Pairs each history row with its author, fetching unknown authors in
    /// one batch
    async fn resolve_history(&self, rows: Vec<MessageWithSender>) -> Vec<(Message, AuthorDisplay)> {
        let mut unknown = Vec::new();
        for row in &rows {
            match &row.sender {
                Some(sender) => self.ctx.profiles.remember(Profile {
                    id: row.message.sender_id,
                    username: sender.username.clone(),
                    avatar_url: sender.avatar_url.clone(),
                }),
                None => unknown.push(row.message.sender_id),
            }
        }
        let resolved = self.ctx.profiles.resolve_many(&unknown).await;

        rows.into_iter()
            .map(|row| {
                let author = match row.sender {
                    Some(sender) => AuthorDisplay::new(sender.username, sender.avatar_url),
                    None => resolved
                        .get(&row.message.sender_id)
                        .cloned()
                        .unwrap_or_else(AuthorDisplay::placeholder),
                };
                (row.message, author)
            })
            .collect()
    }

    async fn merge_incoming(&self, generation: u64, conversation_id: Uuid, self_id: Uuid, message: Message) {
        if message.conversation_id != conversation_id {
            return;
        }
        if self.state.lock().store.contains(message.id) {
            return;
        }
        let author = self.ctx.profiles.resolve(message.sender_id).await;
        let message_id = message.id;
        let merged = self.update_current(generation, |state| {
            state.store.merge_confirmed(message, author, Some(self_id))
        });
        if merged == Some(true) {
            debug!(%conversation_id, %message_id, "merged realtime message");
        }
    }

    fn on_broadcast(&self, generation: u64, conversation_id: Uuid, self_id: Uuid, message: BroadcastMessage) {
        let Some(user_id) = message.composing_user() else {
            return;
        };
        if user_id == self_id {
            return;
        }
        self.update_current(generation, |state| {
            state.composing.signal(ComposingSignal {
                conversation_id,
                user_id,
                received_at: Instant::now(),
            });
        });
    }

    /// Marks the feed degraded and resubscribes until it succeeds
    async fn recover<T, F, Fut>(&self, generation: u64, channel: &str, reason: String, subscribe: F) -> Subscription<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<Subscription<T>>>,
    {
        warn!(channel, %reason, "realtime channel lost, resubscribing");
        self.update_current(generation, |state| {
            state.phase = FeedPhase::Error(AppError::SubscriptionLost(reason));
        });

        let timeout = self.ctx.config.request_timeout;
        loop {
            let attempt = with_retry(self.ctx.config.resubscribe.clone(), || {
                bounded(timeout, subscribe())
            })
            .await;
            match attempt {
                Ok(subscription) => {
                    info!(channel, "realtime channel restored");
                    return subscription;
                }
                Err(e) => {
                    warn!(channel, error = %e.into_inner(), "resubscribe attempts exhausted, starting over");
                }
            }
        }
    }

    fn restore_phase(&self, generation: u64) {
        self.update_current(generation, |state| {
            if matches!(state.phase, FeedPhase::Error(AppError::SubscriptionLost(_))) {
                state.phase = state.settled_phase();
            }
        });
    }

    /// Fetches history again and merges whatever was missed while offline
    async fn catch_up(&self, generation: u64, conversation_id: Uuid, self_id: Uuid) {
        let history = bounded(
            self.ctx.config.request_timeout,
            self.ctx.gateway.fetch_messages(conversation_id),
        )
        .await;

        match history {
            Ok(rows) => {
                let entries = self.resolve_history(rows).await;
                let merged = self.update_current(generation, |state| {
                    entries
                        .into_iter()
                        .map(|(message, author)| state.store.merge_confirmed(message, author, Some(self_id)))
                        .filter(|merged| *merged)
                        .count()
                });
                debug!(%conversation_id, merged = merged.unwrap_or(0), "catch-up fetch merged");
            }
            Err(e) => {
                warn!(%conversation_id, error = %e, "catch-up fetch failed");
            }
        }
    }
}

/// Background task of one open conversation
async fn run_channels(
    shared: Arc<FeedShared>,
    generation: u64,
    conversation_id: Uuid,
    self_id: Uuid,
    mut inserts: Subscription<Message>,
    mut broadcasts: Subscription<BroadcastMessage>,
) {
    loop {
        let deadline = shared.state.lock().composing.deadline();

        let step = tokio::select! {
            event = inserts.next() => ChannelStep::Insert(event),
            event = broadcasts.next() => ChannelStep::Broadcast(event),
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                ChannelStep::ComposingExpired
            }
        };

        match step {
            ChannelStep::Insert(event) => match into_payload(event) {
                Ok(message) => {
                    shared
                        .merge_incoming(generation, conversation_id, self_id, message)
                        .await
                }
                Err(reason) => {
                    drop(inserts);
                    inserts = shared
                        .recover(generation, "messages", reason, || {
                            shared.ctx.gateway.subscribe_inserts(conversation_id)
                        })
                        .await;
                    shared.catch_up(generation, conversation_id, self_id).await;
                    shared.restore_phase(generation);
                }
            },
            ChannelStep::Broadcast(event) => match into_payload(event) {
                Ok(message) => shared.on_broadcast(generation, conversation_id, self_id, message),
                Err(reason) => {
                    drop(broadcasts);
                    let topic = composing_topic(conversation_id);
                    broadcasts = shared
                        .recover(generation, "composing", reason, || {
                            shared.ctx.gateway.subscribe_broadcast(&topic)
                        })
                        .await;
                    shared.restore_phase(generation);
                }
            },
            ChannelStep::ComposingExpired => {
                shared.update_current(generation, |state| state.composing.expire(Instant::now()));
            }
        }
    }
}
