//! One open conversation: history, realtime inserts and outgoing sends.
//!
//! [`ChatSession`] owns the [`Conversation`] list. Every mutation happens on
//! the task that drives it, either through the direct methods or inside
//! [`ChatSession::run`], which multiplexes UI commands, feed events, in-flight
//! deliveries and reconnect attempts with `tokio::select!`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;

use crate::backend::{Backends, FeedEvent, MessageStore, RealtimeFeed, Subscription};
use crate::models::{Draft, Message, MessageId, ParticipantPair};
use crate::services::auth::AuthService;
use crate::services::conversation::{load_history, load_since};
use crate::services::delivery::{Channel, Delivered, Dispatcher};
use crate::services::error::ChatError;
use crate::services::reconciler::{Conversation, PendingSend};
use crate::services::settings::{ChatSettings, ReconnectPolicy};

#[derive(Debug)]
pub enum SendOutcome {
    Delivered { channel: Channel },
    /// Both channels failed; the entry stays visible as failed.
    Failed(ChatError),
}

impl SendOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SendOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    Live,
    Reconnecting,
    /// Resubscribing gave up; sends still work.
    Offline(String),
}

pub enum ChatCommand {
    Send(Draft),
    /// Retry the realtime feed after it went offline.
    Reconnect,
    Close,
}

/// Updates emitted by [`ChatSession::run`].
#[derive(Debug, Clone)]
pub enum ChatUpdate {
    /// The full list, newest first.
    Messages(Vec<Message>),
    Feed(FeedState),
    SendFailed { id: MessageId, error: String },
    Rejected(String),
}

type Resubscribe = BoxFuture<'static, Result<Subscription, ChatError>>;
type InFlight = BoxFuture<'static, (MessageId, Result<Delivered, ChatError>)>;

pub struct ChatSession {
    conversation: Conversation,
    messages: Arc<dyn MessageStore>,
    realtime: Arc<dyn RealtimeFeed>,
    dispatcher: Dispatcher,
    channel: String,
    reconnect: ReconnectPolicy,
    auth: Option<Arc<AuthService>>,
    subscription: Option<Subscription>,
    feed_state: FeedState,
}

impl ChatSession {
    /// Subscribe to the feed, then load the history.
    ///
    /// Subscribing first means no insert can land between the fetch and the
    /// subscription. A failed subscription is not fatal: the session starts
    /// in [`FeedState::Reconnecting`] and [`run`](Self::run) retries it.
    pub async fn open(
        backends: &Backends,
        pair: ParticipantPair,
        admin_id: &str,
        channel: &str,
        settings: &ChatSettings,
    ) -> Result<Self, ChatError> {
        if !pair.is_valid() {
            return Err(ChatError::InvalidParticipants);
        }

        let (subscription, feed_state) = match backends.realtime.subscribe(channel).await {
            Ok(subscription) => (Some(subscription), FeedState::Live),
            Err(e) => {
                tracing::warn!("Realtime subscribe failed, will retry: {}", e);
                (None, FeedState::Reconnecting)
            }
        };

        // Returning early drops the subscription, which releases it.
        let rows = load_history(backends.messages.as_ref(), &pair).await?;

        let mut conversation = Conversation::new(pair, admin_id, settings.match_window());
        conversation.seed(rows);
        tracing::debug!(
            "Opened conversation with {} ({} messages)",
            conversation.pair().counterpart_id,
            conversation.len()
        );

        Ok(Self {
            conversation,
            messages: backends.messages.clone(),
            realtime: backends.realtime.clone(),
            dispatcher: Dispatcher::from_backends(backends),
            channel: channel.to_string(),
            reconnect: settings.reconnect,
            auth: None,
            subscription,
            feed_state,
        })
    }

    /// Refresh the access token before each resubscribe attempt, so a feed
    /// dropped for an expired token comes back with a valid one.
    pub fn with_auth(mut self, auth: Arc<AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn feed_state(&self) -> &FeedState {
        &self.feed_state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Send a draft and wait for the outcome.
    pub async fn send(&mut self, draft: &Draft) -> Result<SendOutcome, ChatError> {
        let pending = self.begin_send(draft)?;
        let result = self.dispatcher.deliver(&pending.payload).await;
        Ok(self.finish_send(&pending.local_id, result))
    }

    /// Append the optimistic entry. The caller delivers the payload and hands
    /// the result to [`finish_send`](Self::finish_send).
    pub fn begin_send(&mut self, draft: &Draft) -> Result<PendingSend, ChatError> {
        let draft = draft.normalized().ok_or(ChatError::EmptyDraft)?;
        Ok(self.conversation.push_optimistic(&draft, Utc::now()))
    }

    pub fn finish_send(
        &mut self,
        local_id: &MessageId,
        result: Result<Delivered, ChatError>,
    ) -> SendOutcome {
        match result {
            Ok(delivered) => {
                tracing::debug!("Delivered {} via {}", local_id, delivered.channel.as_str());
                self.conversation.confirm(local_id, delivered.row);
                SendOutcome::Delivered {
                    channel: delivered.channel,
                }
            }
            Err(e) => {
                self.conversation.mark_failed(local_id);
                SendOutcome::Failed(e)
            }
        }
    }

    /// Wait for the next feed event. Pends forever while unsubscribed.
    pub async fn next_feed_event(&mut self) -> Option<FeedEvent> {
        next_event(&mut self.subscription).await
    }

    /// Apply a feed event. Returns whether the list changed.
    pub fn apply_feed_event(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Insert(row) => self.conversation.on_remote_insert(row).changed(),
            FeedEvent::Disconnected(reason) => {
                self.drop_subscription(reason);
                false
            }
        }
    }

    /// Resubscribe with backoff, then merge what the feed missed.
    /// Returns the number of entries the refetch changed.
    pub async fn reconnect(&mut self) -> Result<usize, ChatError> {
        self.feed_state = FeedState::Reconnecting;
        let result = resubscribe(
            self.realtime.clone(),
            self.auth.clone(),
            self.channel.clone(),
            self.reconnect,
        )
        .await;
        self.finish_reconnect(result).await
    }

    /// Release the subscription and wait for its socket task to finish.
    pub async fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close().await;
        }
        tracing::debug!(
            "Closed conversation with {}",
            self.conversation.pair().counterpart_id
        );
    }

    /// Drive the session until `Close` arrives or the command channel closes.
    pub async fn run<F>(mut self, mut commands: mpsc::Receiver<ChatCommand>, mut on_update: F)
    where
        F: FnMut(ChatUpdate) + Send,
    {
        let mut deliveries: FuturesUnordered<InFlight> = FuturesUnordered::new();
        let mut reconnecting: Option<Resubscribe> = None;

        on_update(ChatUpdate::Messages(self.messages().to_vec()));
        on_update(ChatUpdate::Feed(self.feed_state.clone()));

        loop {
            if self.subscription.is_none()
                && reconnecting.is_none()
                && self.feed_state == FeedState::Reconnecting
            {
                on_update(ChatUpdate::Feed(FeedState::Reconnecting));
                reconnecting = Some(resubscribe(
                    self.realtime.clone(),
                    self.auth.clone(),
                    self.channel.clone(),
                    self.reconnect,
                ));
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(ChatCommand::Send(draft)) => match self.begin_send(&draft) {
                        Ok(pending) => {
                            on_update(ChatUpdate::Messages(self.messages().to_vec()));
                            let dispatcher = self.dispatcher.clone();
                            deliveries.push(
                                async move {
                                    let result = dispatcher.deliver(&pending.payload).await;
                                    (pending.local_id, result)
                                }
                                .boxed(),
                            );
                        }
                        Err(e) => on_update(ChatUpdate::Rejected(e.to_string())),
                    },
                    Some(ChatCommand::Reconnect) => {
                        if matches!(self.feed_state, FeedState::Offline(_)) {
                            self.feed_state = FeedState::Reconnecting;
                        }
                    }
                    Some(ChatCommand::Close) | None => break,
                },
                Some((local_id, result)) = deliveries.next(), if !deliveries.is_empty() => {
                    if let SendOutcome::Failed(e) = self.finish_send(&local_id, result) {
                        on_update(ChatUpdate::SendFailed { id: local_id, error: e.to_string() });
                    }
                    on_update(ChatUpdate::Messages(self.messages().to_vec()));
                }
                event = next_event(&mut self.subscription), if self.subscription.is_some() => {
                    let event = event.unwrap_or_else(|| FeedEvent::Disconnected("Feed ended".to_string()));
                    if self.apply_feed_event(event) {
                        on_update(ChatUpdate::Messages(self.messages().to_vec()));
                    }
                }
                result = poll_resubscribe(&mut reconnecting), if reconnecting.is_some() => {
                    reconnecting = None;
                    match self.finish_reconnect(result).await {
                        Ok(merged) => {
                            if merged > 0 {
                                on_update(ChatUpdate::Messages(self.messages().to_vec()));
                            }
                        }
                        Err(e) => tracing::warn!("{}", e),
                    }
                    on_update(ChatUpdate::Feed(self.feed_state.clone()));
                }
            }
        }

        // Deliveries still in flight are abandoned; their entries stay pending.
        drop(deliveries);
        self.close().await;
    }

    fn drop_subscription(&mut self, reason: String) {
        tracing::warn!("Realtime feed lost: {}", reason);
        // Dropping cancels the socket task.
        self.subscription = None;
        self.feed_state = FeedState::Reconnecting;
    }

    async fn finish_reconnect(
        &mut self,
        result: Result<Subscription, ChatError>,
    ) -> Result<usize, ChatError> {
        let subscription = match result {
            Ok(subscription) => subscription,
            Err(e) => {
                self.feed_state = FeedState::Offline(e.to_string());
                return Err(e);
            }
        };
        self.subscription = Some(subscription);
        self.feed_state = FeedState::Live;

        let since = self.conversation.newest_confirmed_at();
        match load_since(self.messages.as_ref(), self.conversation.pair(), since).await {
            Ok(rows) => {
                let merged = self.conversation.merge(rows);
                tracing::info!("Realtime feed restored, merged {} missed messages", merged);
                Ok(merged)
            }
            Err(e) => {
                // The feed is live again; a failed catch-up only leaves a gap.
                tracing::warn!("Catch-up fetch after reconnect failed: {}", e);
                Ok(0)
            }
        }
    }
}

fn resubscribe(
    realtime: Arc<dyn RealtimeFeed>,
    auth: Option<Arc<AuthService>>,
    channel: String,
    policy: ReconnectPolicy,
) -> Resubscribe {
    async move {
        let mut last_error = String::from("no attempts made");
        for attempt in 0..policy.max_attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
            if let Some(auth) = &auth {
                if let Err(e) = auth.ensure_fresh().await {
                    tracing::warn!("Token refresh before resubscribe failed: {}", e);
                }
            }
            match realtime.subscribe(&channel).await {
                Ok(subscription) => return Ok(subscription),
                Err(e) => {
                    tracing::warn!(
                        "Resubscribe attempt {}/{} failed: {}",
                        attempt + 1,
                        policy.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(ChatError::Disconnected(last_error))
    }
    .boxed()
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<FeedEvent> {
    match subscription {
        Some(subscription) => subscription.next_event().await,
        None => std::future::pending().await,
    }
}

async fn poll_resubscribe(pending: &mut Option<Resubscribe>) -> Result<Subscription, ChatError> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
