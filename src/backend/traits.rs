use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::subscription::Subscription;
use super::types::{BackendError, MessageRow, NewMessage, PushRegistration};
use crate::models::{ParticipantPair, Profile, Session};

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;

    /// Make `session` the identity used by subsequent data requests.
    fn use_session(&self, session: Option<&Session>);
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages exchanged between the pair, newest first, optionally only
    /// those created after `since`.
    async fn conversation(
        &self,
        pair: &ParticipantPair,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, BackendError>;

    /// Every message the user sent or received, newest first.
    async fn involving(&self, user_id: &str) -> Result<Vec<MessageRow>, BackendError>;

    async fn insert(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError>;
}

/// Application-level send that also triggers notification fan-out.
#[async_trait]
pub trait SendEndpoint: Send + Sync {
    async fn send(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError>;
}

#[async_trait]
pub trait RealtimeFeed: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackendError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;

    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError>;
}

#[async_trait]
pub trait PushTokenStore: Send + Sync {
    async fn upsert(&self, registration: &PushRegistration) -> Result<(), BackendError>;
}
