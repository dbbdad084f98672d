use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::models::{DeliveryState, Message, MessageId};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: HTTP {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Realtime error: {0}")]
    Realtime(String),
}

/// A row of the `chat_messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_admin_reply: bool,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::Server(self.id),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.message.unwrap_or_default(),
            attachment_url: self.attachment_url.filter(|u| !u.is_empty()),
            created_at: self.created_at,
            is_admin_reply: self.is_admin_reply,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// Insert payload for `chat_messages` and the primary send endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub is_admin_reply: bool,
}

impl NewMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            message: message.body.clone(),
            attachment_url: message.attachment_url.clone(),
            is_admin_reply: message.is_admin_reply,
        }
    }
}

/// Device metadata stored alongside a push token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub os: String,
    pub version: String,
}

/// A row of the `mobile_push_tokens` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRegistration {
    pub user_id: String,
    pub push_token: String,
    pub device_info: DeviceInfo,
}

/// What the realtime feed yields.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Insert(MessageRow),
    Disconnected(String),
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {}",
            other
        ))),
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

// Realtime records of `timestamp` (not `timestamptz`) columns carry no offset.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {}", raw)))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"]
        .iter()
        .find_map(|fmt| {
            NaiveDateTime::parse_from_str(raw, fmt)
                .map(|naive| naive.and_utc())
                .ok()
                .or_else(|| {
                    DateTime::parse_from_str(raw, fmt)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc))
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_with_numeric_id_and_null_flag() {
        let json = r#"{
            "id": 42,
            "sender_id": "u1",
            "receiver_id": "a1",
            "message": "hello",
            "attachment_url": null,
            "is_admin_reply": null,
            "created_at": "2025-11-25T10:15:30.123456+00:00"
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.id, "42");
        assert!(!row.is_admin_reply);

        let msg = row.into_message();
        assert_eq!(msg.id, MessageId::Server("42".into()));
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_timestamp_without_offset() {
        let ts = parse_timestamp("2025-11-25T10:15:30.5").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-11-25T10:15:30.500+00:00");
        let ts = parse_timestamp("2025-11-25 10:15:30+00").unwrap();
        assert_eq!(ts.timestamp(), parse_timestamp("2025-11-25T10:15:30Z").unwrap().timestamp());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_new_message_skips_missing_attachment() {
        let payload = NewMessage {
            sender_id: "u1".into(),
            receiver_id: "a1".into(),
            message: "hi".into(),
            attachment_url: None,
            is_admin_reply: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("attachment_url").is_none());
        assert_eq!(json["message"], "hi");
    }
}
