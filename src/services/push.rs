use std::sync::Arc;

use crate::backend::{DeviceInfo, PushRegistration, PushTokenStore};

const UNKNOWN: &str = "unknown";

/// Metadata describing the machine this client runs on.
pub fn current_device() -> DeviceInfo {
    let model = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let version = std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.trim().to_string())
        .ok()
        .filter(|release| !release.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    DeviceInfo {
        model,
        os: std::env::consts::OS.to_string(),
        version,
    }
}

/// Registers the device's push token for the signed-in user.
pub struct PushRegistrar {
    store: Arc<dyn PushTokenStore>,
    device: DeviceInfo,
}

impl PushRegistrar {
    pub fn new(store: Arc<dyn PushTokenStore>) -> Self {
        Self::with_device(store, current_device())
    }

    pub fn with_device(store: Arc<dyn PushTokenStore>, device: DeviceInfo) -> Self {
        Self { store, device }
    }

    /// Upsert the token. Failures are logged and reported as `false`.
    pub async fn register(&self, user_id: &str, push_token: &str) -> bool {
        if user_id.is_empty() || push_token.trim().is_empty() {
            tracing::debug!("Skipping push registration without user or token");
            return false;
        }

        let registration = PushRegistration {
            user_id: user_id.to_string(),
            push_token: push_token.trim().to_string(),
            device_info: self.device.clone(),
        };

        match self.store.upsert(&registration).await {
            Ok(()) => {
                tracing::info!("Registered push token for {}", user_id);
                true
            }
            Err(e) => {
                tracing::warn!("Push token registration failed: {}", e);
                false
            }
        }
    }
}
