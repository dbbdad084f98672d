use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::ProfileStore;
use crate::models::profile::{display_name, placeholder_name, ADMIN_DISPLAY_NAME};
use crate::models::Profile;
use crate::services::error::ChatError;

/// What a conversation header or inbox row shows for an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl ResolvedProfile {
    fn placeholder(user_id: &str) -> Self {
        Self {
            display_name: placeholder_name(user_id),
            avatar_url: None,
        }
    }
}

#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    admin_id: String,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn ProfileStore>, admin_id: impl Into<String>) -> Self {
        Self {
            store,
            admin_id: admin_id.into(),
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        user_id == self.admin_id
    }

    /// Resolve a name and avatar, falling back to the placeholder on failure.
    pub async fn resolve(&self, user_id: &str) -> ResolvedProfile {
        match self.try_resolve(user_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("{}", e);
                ResolvedProfile::placeholder(user_id)
            }
        }
    }

    pub async fn try_resolve(&self, user_id: &str) -> Result<ResolvedProfile, ChatError> {
        // The admin's name is fixed; no lookup needed.
        if self.is_admin(user_id) {
            return Ok(ResolvedProfile {
                display_name: ADMIN_DISPLAY_NAME.to_string(),
                avatar_url: None,
            });
        }

        let profile = self
            .store
            .profile(user_id)
            .await
            .map_err(|source| ChatError::ProfileResolution {
                user_id: user_id.to_string(),
                source,
            })?;
        Ok(self.to_resolved(user_id, profile.as_ref()))
    }

    /// Resolve many identities with one lookup. Ids the store does not know
    /// are left out so callers keep their own defaults.
    pub async fn resolve_many(
        &self,
        user_ids: &[String],
    ) -> Result<HashMap<String, ResolvedProfile>, ChatError> {
        let lookup: Vec<String> = user_ids
            .iter()
            .filter(|id| !self.is_admin(id))
            .cloned()
            .collect();

        let profiles: HashMap<String, Profile> = if lookup.is_empty() {
            HashMap::new()
        } else {
            self.store
                .profiles(&lookup)
                .await
                .map_err(|source| ChatError::ProfileResolution {
                    user_id: lookup.join(","),
                    source,
                })?
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect()
        };

        Ok(user_ids
            .iter()
            .filter(|id| self.is_admin(id) || profiles.contains_key(*id))
            .map(|id| (id.clone(), self.to_resolved(id, profiles.get(id))))
            .collect())
    }

    fn to_resolved(&self, user_id: &str, profile: Option<&Profile>) -> ResolvedProfile {
        ResolvedProfile {
            display_name: display_name(user_id, &self.admin_id, profile),
            avatar_url: profile
                .and_then(|p| p.profile_photo.clone())
                .filter(|url| !url.is_empty()),
        }
    }
}
