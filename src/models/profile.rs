use serde::{Deserialize, Serialize};

pub const ADMIN_DISPLAY_NAME: &str = "Portfolio Admin";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

/// Placeholder name for an identity without a usable profile.
pub fn placeholder_name(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(5).collect();
    format!("User {}", prefix)
}

/// Human-readable name for `user_id`.
///
/// The admin always shows as [`ADMIN_DISPLAY_NAME`]. Otherwise the full name
/// wins, then the local part of the email, then [`placeholder_name`].
pub fn display_name(user_id: &str, admin_id: &str, profile: Option<&Profile>) -> String {
    if user_id == admin_id {
        return ADMIN_DISPLAY_NAME.to_string();
    }

    let Some(profile) = profile else {
        return placeholder_name(user_id);
    };

    if let Some(name) = profile.full_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    profile
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| placeholder_name(user_id))
}
