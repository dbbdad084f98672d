use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{AuthProvider, BackendError};
use crate::models::Session;
use crate::services::database::Database;

/// Refresh when the access token has less than this left.
const REFRESH_MARGIN_SECS: i64 = 60;
const MIN_REFRESH_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
const REFRESH_RETRY: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Please fill in all fields")]
    MissingCredentials,

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Session storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Owns the signed-in session and tells subscribers when it changes.
pub struct AuthService {
    provider: Arc<dyn AuthProvider>,
    db: Database,
    session: watch::Sender<Option<Session>>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn AuthProvider>, db: Database) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            provider,
            db,
            session,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    pub fn current(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    /// Pick up the session persisted by a previous run.
    ///
    /// A stored session that can no longer be refreshed is discarded.
    pub async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let Some(stored) = self.db.load_session().await? else {
            return Ok(None);
        };

        if !stored.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            tracing::debug!("Restored session for {}", stored.user.id);
            self.publish(Some(stored.clone()));
            return Ok(Some(stored));
        }

        self.refresh_or_discard(&stored).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let session = self.provider.sign_in_with_password(email, password).await?;
        self.db.save_session(&session).await?;
        tracing::info!("Signed in as {}", session.user.id);
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Refresh the session if it is about to expire. Returns the usable session,
    /// or `None` once the backend rejected the refresh token.
    pub async fn ensure_fresh(&self) -> Result<Option<Session>, AuthError> {
        let Some(current) = self.current() else {
            return Ok(None);
        };
        if !current.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(Some(current));
        }
        self.refresh_or_discard(&current).await
    }

    /// Keep the access token fresh in the background until `cancel` fires.
    ///
    /// Each refresh lands shortly before expiry. A rejected refresh signs the
    /// user out, which subscribers see as `None`; network failures are retried.
    pub fn spawn_refresher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let auth = Arc::clone(self);
        tokio::spawn(async move {
            let mut updates = auth.subscribe();
            loop {
                let due = updates
                    .borrow_and_update()
                    .as_ref()
                    .map(|session| refresh_delay(session, Utc::now()));

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep_for(due) => {
                        if let Err(e) = auth.ensure_fresh().await {
                            tracing::warn!("Background token refresh failed: {}", e);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(REFRESH_RETRY) => {}
                            }
                        }
                    }
                }
            }
            tracing::debug!("Token refresher stopped");
        })
    }

    /// Revoke the session remotely when possible and forget it locally.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(current) = self.current() {
            if let Err(e) = self.provider.sign_out(&current.access_token).await {
                tracing::warn!("Remote sign-out failed: {}", e);
            }
        }
        self.db.clear_session().await?;
        self.publish(None);
        tracing::info!("Signed out");
        Ok(())
    }

    async fn refresh_or_discard(&self, stale: &Session) -> Result<Option<Session>, AuthError> {
        match self.refresh_from(stale).await {
            Ok(session) => Ok(Some(session)),
            Err(AuthError::Backend(BackendError::Auth(reason))) => {
                tracing::warn!("Session rejected, signing out: {}", reason);
                self.db.clear_session().await?;
                self.publish(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_from(&self, stale: &Session) -> Result<Session, AuthError> {
        let session = self.provider.refresh(&stale.refresh_token).await?;
        self.db.save_session(&session).await?;
        tracing::debug!("Refreshed session for {}", session.user.id);
        self.publish(Some(session.clone()));
        Ok(session)
    }

    fn publish(&self, session: Option<Session>) {
        self.provider.use_session(session.as_ref());
        self.session.send_replace(session);
    }
}

fn refresh_delay(session: &Session, now: DateTime<Utc>) -> std::time::Duration {
    (session.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) - now)
        .to_std()
        .unwrap_or_default()
        .max(MIN_REFRESH_DELAY)
}

async fn sleep_for(delay: Option<std::time::Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
