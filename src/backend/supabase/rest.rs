use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::client::{invalid, network, SupabaseClient};
use super::models::SendResponse;
use crate::backend::traits::{MessageStore, ProfileStore, PushTokenStore, SendEndpoint};
use crate::backend::types::{BackendError, MessageRow, NewMessage, PushRegistration};
use crate::models::{ParticipantPair, Profile};

pub const MESSAGES_TABLE: &str = "chat_messages";
pub const PROFILES_TABLE: &str = "users";
pub const PUSH_TOKENS_TABLE: &str = "mobile_push_tokens";

const PROFILE_COLUMNS: &str = "id,full_name,email,profile_photo";

/// Double-quote a PostgREST filter value so reserved characters stay literal.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `or` filter selecting both directions of a conversation.
pub fn conversation_filter(pair: &ParticipantPair) -> String {
    let a = quote(&pair.local_user_id);
    let b = quote(&pair.counterpart_id);
    format!(
        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))",
        a = a,
        b = b
    )
}

/// `or` filter selecting every message a user sent or received.
pub fn involving_filter(user_id: &str) -> String {
    let u = quote(user_id);
    format!("(sender_id.eq.{u},receiver_id.eq.{u})", u = u)
}

pub fn in_filter(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("in.({})", quoted.join(","))
}

/// Pull the stored row out of a send endpoint response, if it echoes one.
pub fn parse_send_response(body: &str) -> Option<MessageRow> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidate = serde_json::from_value::<SendResponse>(value.clone())
        .ok()
        .and_then(|r| r.data)
        .unwrap_or(value);
    let candidate = match candidate {
        serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
        other => other,
    };
    serde_json::from_value(candidate).ok()
}

impl SupabaseClient {
    async fn select_messages(
        &self,
        filters: Vec<(&str, String)>,
    ) -> Result<Vec<MessageRow>, BackendError> {
        let url = self.rest_url(MESSAGES_TABLE)?;
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        query.extend(filters);

        let response = self
            .authorized(self.http().get(url))
            .query(&query)
            .send()
            .await
            .map_err(network)?;

        Self::check(response).await?.json().await.map_err(invalid)
    }
}

#[async_trait]
impl MessageStore for SupabaseClient {
    async fn conversation(
        &self,
        pair: &ParticipantPair,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, BackendError> {
        let mut filters = vec![("or", conversation_filter(pair))];
        if let Some(since) = since {
            filters.push((
                "created_at",
                format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ));
        }
        self.select_messages(filters).await
    }

    async fn involving(&self, user_id: &str) -> Result<Vec<MessageRow>, BackendError> {
        self.select_messages(vec![("or", involving_filter(user_id))])
            .await
    }

    async fn insert(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError> {
        let url = self.rest_url(MESSAGES_TABLE)?;
        let response = self
            .authorized(self.http().post(url))
            .header("Prefer", "return=representation")
            .json(message)
            .send()
            .await
            .map_err(network)?;

        let rows: Vec<MessageRow> = Self::check(response).await?.json().await.map_err(invalid)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl SendEndpoint for SupabaseClient {
    async fn send(&self, message: &NewMessage) -> Result<Option<MessageRow>, BackendError> {
        let response = self
            .http()
            .post(self.send_endpoint().clone())
            .header("Content-Type", "application/json")
            .json(message)
            .send()
            .await
            .map_err(network)?;

        let body = Self::check(response).await?.text().await.map_err(network)?;
        Ok(parse_send_response(&body))
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let profiles = self.profiles(&[user_id.to_string()]).await?;
        Ok(profiles.into_iter().find(|p| p.id == user_id))
    }

    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.rest_url(PROFILES_TABLE)?;
        let response = self
            .authorized(self.http().get(url))
            .query(&[("select", PROFILE_COLUMNS.to_string()), ("id", in_filter(user_ids))])
            .send()
            .await
            .map_err(network)?;

        Self::check(response).await?.json().await.map_err(invalid)
    }
}

#[async_trait]
impl PushTokenStore for SupabaseClient {
    async fn upsert(&self, registration: &PushRegistration) -> Result<(), BackendError> {
        let url = self.rest_url(PUSH_TOKENS_TABLE)?;
        let response = self
            .authorized(self.http().post(url))
            .query(&[("on_conflict", "user_id,push_token")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(registration)
            .send()
            .await
            .map_err(network)?;

        Self::check(response).await?;
        Ok(())
    }
}
