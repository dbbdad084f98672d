use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to load messages: {0}")]
    Fetch(#[source] BackendError),

    #[error("Primary send failed: {0}")]
    SendPrimary(#[source] BackendError),

    #[error("Message not delivered ({primary}); direct insert failed: {fallback}")]
    SendFallback {
        primary: Box<ChatError>,
        #[source]
        fallback: BackendError,
    },

    #[error("Could not resolve profile for {user_id}: {source}")]
    ProfileResolution {
        user_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Nothing to send")]
    EmptyDraft,

    #[error("Both participants are required")]
    InvalidParticipants,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Realtime feed unavailable: {0}")]
    Disconnected(String),
}

impl ChatError {
    /// Whether the error left a message undelivered.
    pub fn is_send_failure(&self) -> bool {
        matches!(self, ChatError::SendFallback { .. })
    }
}
