use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two participants of a conversation, from the local user's side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    pub local_user_id: String,
    pub counterpart_id: String,
}

impl ParticipantPair {
    pub fn new(local_user_id: impl Into<String>, counterpart_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            counterpart_id: counterpart_id.into(),
        }
    }

    /// True when both ids are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.local_user_id.trim().is_empty() && !self.counterpart_id.trim().is_empty()
    }

    /// Whether a sender/receiver pair belongs to this conversation, in either direction.
    pub fn matches(&self, sender_id: &str, receiver_id: &str) -> bool {
        (sender_id == self.local_user_id && receiver_id == self.counterpart_id)
            || (sender_id == self.counterpart_id && receiver_id == self.local_user_id)
    }
}

/// One row of the inbox: the latest exchange with a counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub counterpart_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub is_admin_reply: bool,
}
