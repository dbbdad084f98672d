use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

use super::client::{invalid, network, SupabaseClient};
use super::models::{JwtClaims, PasswordGrant, RefreshGrant, TokenResponse};
use crate::backend::traits::AuthProvider;
use crate::backend::types::BackendError;
use crate::models::{Session, SessionUser};

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Decode the claims of a JWT without verifying it.
pub fn jwt_claims(token: &str) -> Option<JwtClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn session_from_token(token: TokenResponse, now: DateTime<Utc>) -> Session {
    let expires_at = token
        .expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| token.expires_in.map(|secs| now + Duration::seconds(secs)))
        .or_else(|| {
            jwt_claims(&token.access_token)
                .and_then(|claims| claims.exp)
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

    Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        user: SessionUser {
            id: token.user.id,
            email: token.user.email,
            full_name: token.user.user_metadata.and_then(|m| m.full_name),
        },
    }
}

impl SupabaseClient {
    async fn token_grant<T: Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &T,
    ) -> Result<Session, BackendError> {
        let url = self.endpoint("auth/v1/token")?;
        let response = self
            .http()
            .post(url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", self.anon_key())
            .json(body)
            .send()
            .await
            .map_err(network)?;

        // GoTrue reports bad credentials and stale refresh tokens as 400.
        let response = match Self::check(response).await {
            Ok(response) => response,
            Err(BackendError::RequestFailed { status: 400, message }) => {
                return Err(BackendError::Auth(message))
            }
            Err(e) => return Err(e),
        };

        let token: TokenResponse = response.json().await.map_err(invalid)?;
        Ok(session_from_token(token, Utc::now()))
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        self.token_grant("password", &PasswordGrant { email, password })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        self.token_grant("refresh_token", &RefreshGrant { refresh_token })
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let url = self.endpoint("auth/v1/logout")?;
        let response = self
            .http()
            .post(url)
            .header("apikey", self.anon_key())
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(network)?;
        Self::check(response).await?;
        Ok(())
    }

    fn use_session(&self, session: Option<&Session>) {
        self.set_access_token(session.map(|s| s.access_token.clone()));
    }
}
