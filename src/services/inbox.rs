use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{MessageRow, MessageStore, ProfileStore};
use crate::models::profile::ADMIN_DISPLAY_NAME;
use crate::models::ConversationSummary;
use crate::services::conversation::truncate_preview;
use crate::services::error::ChatError;
use crate::services::profiles::ProfileResolver;

const DEFAULT_NAME: &str = "User";
const IMAGE_PREVIEW: &str = "Photo";

/// The list of conversations the signed-in user takes part in.
pub struct Inbox {
    messages: Arc<dyn MessageStore>,
    profiles: ProfileResolver,
    admin_id: String,
}

impl Inbox {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileStore>,
        admin_id: impl Into<String>,
    ) -> Self {
        let admin_id = admin_id.into();
        Self {
            messages,
            profiles: ProfileResolver::new(profiles, admin_id.clone()),
            admin_id,
        }
    }

    /// One summary per counterpart, most recent conversation first.
    pub async fn refresh(&self, user_id: &str) -> Result<Vec<ConversationSummary>, ChatError> {
        let rows = self.messages.involving(user_id).await.map_err(|e| {
            tracing::error!("Failed to load inbox: {}", e);
            ChatError::Fetch(e)
        })?;

        let mut summaries = group_by_counterpart(user_id, &self.admin_id, &rows);
        let ids: Vec<String> = summaries.iter().map(|s| s.counterpart_id.clone()).collect();

        match self.profiles.resolve_many(&ids).await {
            Ok(resolved) => {
                for summary in &mut summaries {
                    if let Some(profile) = resolved.get(&summary.counterpart_id) {
                        summary.display_name = profile.display_name.clone();
                        summary.avatar_url = profile.avatar_url.clone();
                    }
                }
            }
            // Names stay at their defaults.
            Err(e) => tracing::warn!("{}", e),
        }

        Ok(summaries)
    }

    /// Who to open a conversation with when the inbox is empty.
    ///
    /// Visitors always have the admin to talk to; the admin has no default.
    pub fn start_target(&self, user_id: &str, summaries: &[ConversationSummary]) -> Option<String> {
        if summaries.is_empty() && user_id != self.admin_id && !self.admin_id.is_empty() {
            Some(self.admin_id.clone())
        } else {
            None
        }
    }
}

/// Group rows (newest first) by the other participant, keeping the newest row of each.
pub fn group_by_counterpart(
    user_id: &str,
    admin_id: &str,
    rows: &[MessageRow],
) -> Vec<ConversationSummary> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut summaries = Vec::new();

    for row in rows {
        let counterpart = if row.sender_id == user_id {
            row.receiver_id.as_str()
        } else {
            row.sender_id.as_str()
        };
        if counterpart.is_empty() || !seen.insert(counterpart) {
            continue;
        }

        summaries.push(ConversationSummary {
            counterpart_id: counterpart.to_string(),
            display_name: if counterpart == admin_id {
                ADMIN_DISPLAY_NAME.to_string()
            } else {
                DEFAULT_NAME.to_string()
            },
            avatar_url: None,
            last_message: preview(row),
            last_message_at: row.created_at,
            is_admin_reply: row.is_admin_reply,
        });
    }

    summaries
}

fn preview(row: &MessageRow) -> String {
    match row.message.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => truncate_preview(text),
        _ if row.attachment_url.as_deref().is_some_and(|u| !u.is_empty()) => {
            IMAGE_PREVIEW.to_string()
        }
        _ => String::new(),
    }
}
