use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const LOCAL_ID_PREFIX: &str = "local-";
const IMAGE_EXTENSIONS: &[&str] = &[".jpeg", ".jpg", ".gif", ".png", ".webp"];

/// Identifier of a message in a conversation view.
///
/// Server ids come from the message store; local ids are minted by the client
/// for optimistic entries and are never sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Server(String),
    Local(String),
}

impl MessageId {
    /// Build a local id from a millisecond timestamp and a per-session sequence.
    pub fn local(millis: i64, seq: u64) -> Self {
        MessageId::Local(format!("{}{}-{}", LOCAL_ID_PREFIX, millis, seq))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MessageId::Local(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Server(id) | MessageId::Local(id) => id,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Confirmed => "confirmed",
            DeliveryState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_admin_reply: bool,
    #[serde(skip, default = "confirmed")]
    pub delivery: DeliveryState,
}

fn confirmed() -> DeliveryState {
    DeliveryState::Confirmed
}

impl Message {
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }

    /// Image to render for this message: the attachment, or the body when the
    /// body is nothing but a link to an image.
    pub fn image_url(&self) -> Option<&str> {
        if let Some(url) = self.attachment_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(url);
        }
        if is_image_link(&self.body) {
            Some(self.body.as_str())
        } else {
            None
        }
    }

    /// Text to render for this message, if any.
    pub fn display_text(&self) -> Option<&str> {
        if self.body.is_empty() || is_image_link(&self.body) {
            None
        } else {
            Some(self.body.as_str())
        }
    }

    /// Whether `other` carries the same content between the same participants.
    pub fn same_content(&self, other: &Message) -> bool {
        self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.body == other.body
            && self.attachment_url.as_deref().unwrap_or_default()
                == other.attachment_url.as_deref().unwrap_or_default()
    }
}

fn is_image_link(text: &str) -> bool {
    if !text.starts_with("http") {
        return false;
    }
    let lower = text.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

/// A message as composed by the local user, before it has an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachment_url: Option<String>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment_url: None,
        }
    }

    pub fn attachment(url: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            attachment_url: Some(url.into()),
        }
    }

    /// Trimmed text, or `None` when there is nothing to send.
    pub fn normalized(&self) -> Option<Draft> {
        let text = self.text.trim().to_string();
        let attachment_url = self
            .attachment_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        if text.is_empty() && attachment_url.is_none() {
            return None;
        }
        Some(Draft {
            text,
            attachment_url,
        })
    }
}
