use std::sync::{PoisonError, RwLock};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use super::models::ErrorBody;
use crate::backend::types::BackendError;
use crate::config::{AppConfig, APP_ID};

/// Shared handle to one Supabase project.
///
/// Holds the HTTP client, project URLs and the access token of the signed-in
/// user. Construct it once and pass it to whoever needs it.
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    anon_key: String,
    send_endpoint: Url,
    access_token: RwLock<Option<String>>,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Result<Self, BackendError> {
        let mut base = config.supabase_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| BackendError::InvalidResponse(format!("Bad backend URL: {}", e)))?;
        let send_endpoint = Url::parse(&config.send_endpoint_url())
            .map_err(|e| BackendError::InvalidResponse(format!("Bad send endpoint: {}", e)))?;

        let http = Client::builder()
            .user_agent(format!("{}/{}", APP_ID, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(network)?;

        Ok(Self {
            http,
            base_url,
            anon_key: config.anon_key.clone(),
            send_endpoint,
            access_token: RwLock::new(None),
        })
    }

    pub(super) fn http(&self) -> &Client {
        &self.http
    }

    pub(super) fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub(super) fn send_endpoint(&self) -> &Url {
        &self.send_endpoint
    }

    pub(super) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidResponse(format!("Bad endpoint {}: {}", path, e)))
    }

    pub(super) fn rest_url(&self, table: &str) -> Result<Url, BackendError> {
        self.endpoint(&format!("rest/v1/{}", table))
    }

    pub(super) fn realtime_url(&self) -> Result<Url, BackendError> {
        let mut url = self.endpoint("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|_| BackendError::Realtime("Cannot derive websocket URL".to_string()))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    pub(super) fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// The user's access token, or the anon key when signed out.
    pub(super) fn bearer(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    pub(super) fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
    }

    /// Turn a non-success response into a [`BackendError`].
    pub(super) async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = Self::parse_error_message(&body);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Auth(message));
        }

        Err(BackendError::RequestFailed {
            status: status.as_u16(),
            message,
        })
    }

    pub(super) fn parse_error_message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.text().map(str::to_string))
            .unwrap_or_else(|| "Request failed".to_string())
    }
}

pub(super) fn network(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

pub(super) fn invalid(e: impl std::fmt::Display) -> BackendError {
    BackendError::InvalidResponse(e.to_string())
}
