use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::reconciler::DEFAULT_MATCH_WINDOW_SECS;

const SETTINGS_KEY: &str = "chat_settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// How far apart a local send and its confirmed row may be stamped and still match.
    pub match_window_secs: i64,
    pub reconnect: ReconnectPolicy,
    pub register_push: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            match_window_secs: DEFAULT_MATCH_WINDOW_SECS,
            reconnect: ReconnectPolicy::default(),
            register_push: true,
        }
    }
}

impl ChatSettings {
    /// Falls back to the default for a value chrono cannot represent.
    pub fn match_window(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.match_window_secs.max(0))
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_MATCH_WINDOW_SECS))
    }
}

/// Exponential backoff for resubscribing to the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> ChatSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => ChatSettings::default(),
        }
    }

    pub async fn save(db: &Database, settings: &ChatSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }
}
