use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const APP_ID: &str = "dev.folio.Chat";
pub const APP_DIR: &str = "folio-chat";
pub const ENV_PREFIX: &str = "FOLIO_CHAT_";

const DEFAULT_CHANNEL: &str = "mobile-chat";
const SEND_PATH: &str = "/api/chat/send";

/// Where the backend lives and who the admin is.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supabase_url: String,
    pub anon_key: String,
    pub admin_id: String,
    /// Primary send endpoint; defaults to `<supabase_url>/api/chat/send`.
    pub send_endpoint: Option<String>,
    pub realtime_channel: Option<String>,
    /// Device push token to register after sign-in.
    pub push_token: Option<String>,
}

impl AppConfig {
    /// Read the config file (if present), apply `FOLIO_CHAT_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {}, using environment only", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config at {}", path.display()))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("HOME not set")?;
                PathBuf::from(home).join(".config")
            }
        };
        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(v) = var("URL") {
            self.supabase_url = v;
        }
        if let Some(v) = var("ANON_KEY") {
            self.anon_key = v;
        }
        if let Some(v) = var("ADMIN_ID") {
            self.admin_id = v;
        }
        if let Some(v) = var("SEND_ENDPOINT") {
            self.send_endpoint = Some(v);
        }
        if let Some(v) = var("CHANNEL") {
            self.realtime_channel = Some(v);
        }
        if let Some(v) = var("PUSH_TOKEN") {
            self.push_token = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.supabase_url.trim().is_empty() {
            bail!("Backend URL is not configured (set {}URL)", ENV_PREFIX);
        }
        url::Url::parse(&self.supabase_url)
            .with_context(|| format!("Invalid backend URL: {}", self.supabase_url))?;
        if self.anon_key.trim().is_empty() {
            bail!("Anon key is not configured (set {}ANON_KEY)", ENV_PREFIX);
        }
        if self.admin_id.trim().is_empty() {
            bail!("Admin id is not configured (set {}ADMIN_ID)", ENV_PREFIX);
        }
        Ok(())
    }

    pub fn send_endpoint_url(&self) -> String {
        match &self.send_endpoint {
            Some(url) => url.clone(),
            None => format!("{}{}", self.supabase_url.trim_end_matches('/'), SEND_PATH),
        }
    }

    pub fn channel(&self) -> &str {
        self.realtime_channel.as_deref().unwrap_or(DEFAULT_CHANNEL)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("supabase_url", &self.supabase_url)
            .field("anon_key", &"***")
            .field("admin_id", &self.admin_id)
            .field("send_endpoint", &self.send_endpoint)
            .field("realtime_channel", &self.realtime_channel)
            .field("push_token", &self.push_token.as_ref().map(|_| "***"))
            .finish()
    }
}
