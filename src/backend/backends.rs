use std::sync::Arc;

use super::supabase::SupabaseClient;
use super::traits::{
    AuthProvider, MessageStore, ProfileStore, PushTokenStore, RealtimeFeed, SendEndpoint,
};

/// Handles to every backend collaborator, injected into the services.
#[derive(Clone)]
pub struct Backends {
    pub auth: Arc<dyn AuthProvider>,
    pub messages: Arc<dyn MessageStore>,
    pub send_endpoint: Arc<dyn SendEndpoint>,
    pub realtime: Arc<dyn RealtimeFeed>,
    pub profiles: Arc<dyn ProfileStore>,
    pub push_tokens: Arc<dyn PushTokenStore>,
}

impl Backends {
    /// Route every collaborator to one Supabase project.
    pub fn supabase(client: Arc<SupabaseClient>) -> Self {
        Self {
            auth: client.clone(),
            messages: client.clone(),
            send_endpoint: client.clone(),
            realtime: client.clone(),
            profiles: client.clone(),
            push_tokens: client,
        }
    }
}
