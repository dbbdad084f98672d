//! In-memory stand-ins for the backend collaborators, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::subscription::Subscription;
use super::traits::{
    AuthProvider, MessageStore, ProfileStore, PushTokenStore, RealtimeFeed, SendEndpoint,
};
use super::types::{BackendError, FeedEvent, MessageRow, NewMessage, PushRegistration};
use super::Backends;
use crate::models::{ParticipantPair, Profile, Session, SessionUser};

pub fn row(id: &str, sender: &str, receiver: &str, body: &str, at: DateTime<Utc>) -> MessageRow {
    MessageRow {
        id: id.to_string(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        message: Some(body.to_string()),
        attachment_url: None,
        is_admin_reply: false,
        created_at: at,
    }
}

pub fn session(user_id: &str, expires_in_secs: i64) -> Session {
    Session {
        access_token: format!("access-{}", user_id),
        refresh_token: format!("refresh-{}", user_id),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        user: SessionUser {
            id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
            full_name: None,
        },
    }
}

struct Feed {
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct FakeBackend {
    pub rows: Mutex<Vec<MessageRow>>,
    pub fail_fetch: AtomicBool,
    pub fail_primary: AtomicBool,
    pub fail_fallback: AtomicBool,
    /// Whether send channels echo the stored row back.
    pub echo_rows: AtomicBool,
    pub primary_calls: AtomicUsize,
    pub fallback_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub since_queries: Mutex<Vec<Option<DateTime<Utc>>>>,
    next_id: AtomicUsize,

    feeds: Mutex<Vec<Feed>>,
    pub subscribe_failures: AtomicUsize,
    pub subscribe_calls: AtomicUsize,

    pub profiles: Mutex<HashMap<String, Profile>>,
    pub fail_profiles: AtomicBool,

    pub registrations: Mutex<Vec<PushRegistration>>,

    pub accept_password: Mutex<Option<String>>,
    /// Sign-ins hand out a token that is already inside the refresh margin.
    pub short_sessions: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub active_token: Mutex<Option<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn backends(self: &Arc<Self>) -> Backends {
        Backends {
            auth: self.clone(),
            messages: self.clone(),
            send_endpoint: self.clone(),
            realtime: self.clone(),
            profiles: self.clone(),
            push_tokens: self.clone(),
        }
    }

    pub fn seed(&self, rows: Vec<MessageRow>) {
        self.rows.lock().unwrap().extend(rows);
    }

    pub fn add_profile(&self, profile: Profile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile);
    }

    /// Deliver an event on the most recent subscription.
    pub async fn emit(&self, event: FeedEvent) {
        let tx = self.feeds.lock().unwrap().last().map(|f| f.tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }

    pub fn subscriptions_released(&self) -> usize {
        self.feeds
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.cancel.is_cancelled())
            .count()
    }

    fn store(&self, message: &NewMessage) -> MessageRow {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = MessageRow {
            id: format!("srv-{}", n),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            message: Some(message.message.clone()),
            attachment_url: message.attachment_url.clone(),
            is_admin_reply: message.is_admin_reply,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(row.clone());
        row
    }

    fn sorted_desc(mut rows: Vec<MessageRow>) -> Vec<MessageRow> {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl MessageStore for FakeBackend {
    async fn conversation(
        &self,
        pair: &ParticipantPair,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.since_queries.lock().unwrap().push(since);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        let rows = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| pair.matches(&r.sender_id, &r.receiver_id))
            .filter(|r| since.map_or(true, |s| r.created_at > s))
            .cloned()
            .collect();
        Ok(Self::sorted_desc(rows))
    }

    async fn involving(&self, user_id: &str) -> Result<Vec<MessageRow>, BackendError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        let rows = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.sender_id == user_id || r.receiver_id == user_id)
            .cloned()
            .collect();
        Ok(Self::sorted_desc(rows))
    }

    async fn insert(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fallback.load(Ordering::SeqCst) {
            return Err(BackendError::RequestFailed {
                status: 500,
                message: "insert failed".into(),
            });
        }
        let row = self.store(message);
        Ok(self.echo_rows.load(Ordering::SeqCst).then_some(row))
    }
}

#[async_trait]
impl SendEndpoint for FakeBackend {
    async fn send(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_primary.load(Ordering::SeqCst) {
            return Err(BackendError::RequestFailed {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        let row = self.store(message);
        Ok(self.echo_rows.load(Ordering::SeqCst).then_some(row))
    }
}

#[async_trait]
impl RealtimeFeed for FakeBackend {
    async fn subscribe(&self, _channel: &str) -> Result<Subscription, BackendError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.subscribe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.subscribe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Realtime("unreachable".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        self.feeds.lock().unwrap().push(Feed {
            tx,
            cancel: cancel.clone(),
        });
        Ok(Subscription::new(rx, cancel, None))
    }
}

#[async_trait]
impl ProfileStore for FakeBackend {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(BackendError::Network("timeout".into()));
        }
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(BackendError::Network("timeout".into()));
        }
        let profiles = self.profiles.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl PushTokenStore for FakeBackend {
    async fn upsert(&self, registration: &PushRegistration) -> Result<(), BackendError> {
        let mut registrations = self.registrations.lock().unwrap();
        registrations.retain(|r| {
            !(r.user_id == registration.user_id && r.push_token == registration.push_token)
        });
        registrations.push(registration.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for FakeBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let accepted = self.accept_password.lock().unwrap().clone();
        if accepted.as_deref() != Some(password) {
            return Err(BackendError::Auth("Invalid login credentials".into()));
        }
        let user = email.split('@').next().unwrap_or(email);
        let lifetime = if self.short_sessions.load(Ordering::SeqCst) { 30 } else { 3600 };
        Ok(session(user, lifetime))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(BackendError::Auth("Invalid Refresh Token".into()));
        }
        let user = refresh_token.trim_start_matches("refresh-");
        let mut fresh = session(user, 3600);
        fresh.access_token = format!("refreshed-{}", user);
        Ok(fresh)
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), BackendError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn use_session(&self, session: Option<&Session>) {
        *self.active_token.lock().unwrap() = session.map(|s| s.access_token.clone());
    }
}
