use chrono::{DateTime, Utc};

use crate::backend::{MessageRow, MessageStore};
use crate::models::ParticipantPair;
use crate::services::error::ChatError;

const PREVIEW_LEN: usize = 50;

/// Load every message between the pair, newest first.
pub async fn load_history(
    store: &dyn MessageStore,
    pair: &ParticipantPair,
) -> Result<Vec<MessageRow>, ChatError> {
    load_since(store, pair, None).await
}

/// Load messages between the pair created after `since`, newest first.
pub async fn load_since(
    store: &dyn MessageStore,
    pair: &ParticipantPair,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageRow>, ChatError> {
    if !pair.is_valid() {
        return Err(ChatError::InvalidParticipants);
    }

    store.conversation(pair, since).await.map_err(|e| {
        tracing::error!("Failed to load conversation with {}: {}", pair.counterpart_id, e);
        ChatError::Fetch(e)
    })
}

/// Truncate text to a one-line preview for the inbox.
pub fn truncate_preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() > PREVIEW_LEN {
        let cut: String = first_line.chars().take(PREVIEW_LEN - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        first_line.to_string()
    }
}
