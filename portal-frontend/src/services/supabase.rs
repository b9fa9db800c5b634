//! [`AuthGateway`] backed by Supabase GoTrue (auth) and PostgREST (profiles).

use crate::config::SupabaseSettings;
use crate::models::{AuthUser, NewProfile, Profile, Session};
use crate::services::auth_gateway::{
    AuthChange, AuthError, AuthEvent, AuthGateway, GatewayError, SessionChanges,
    CHANGE_CHANNEL_CAPACITY,
};
use crate::services::metrics::PROFILE_FETCH_FAILURES;
use crate::services::storage::{clear_provider_keys, KeyValueStore};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Refresh this long before the access token expires.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// How often the refresh loop looks for a session when none is stored.
const IDLE_REFRESH_POLL: Duration = Duration::from_secs(30);

const PGRST_OBJECT: &str = "application/vnd.pgrst.object+json";
const NO_ROWS: &str = "PGRST116";
const UNIQUE_VIOLATION: &str = "23505";

/// Error body returned by GoTrue or PostgREST, normalised across their shapes.
#[derive(Debug)]
struct ProviderError {
    status: StatusCode,
    code: Option<String>,
    message: String,
}

impl ProviderError {
    async fn read(response: Response) -> Self {
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        let text = |field: &str| {
            body.get(field)
                .and_then(|value| value.as_str())
                .map(str::to_string)
        };

        let message = text("msg")
            .or_else(|| text("message"))
            .or_else(|| text("error_description"))
            .or_else(|| text("error"))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });

        // GoTrue puts its machine code in `error_code`, PostgREST in `code`.
        let code = text("error_code").or_else(|| text("code"));

        Self {
            status,
            code,
            message,
        }
    }

    fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    fn into_auth_error(self) -> AuthError {
        AuthError::classify(&self.message, self.code.as_deref(), Some(self.status.as_u16()))
    }

    fn into_unexpected(self, context: &str) -> GatewayError {
        GatewayError::Unexpected(anyhow!(
            "{context} ({}): {}",
            self.status,
            self.message
        ))
    }
}

pub struct SupabaseGateway {
    client: reqwest::Client,
    settings: SupabaseSettings,
    storage_key: String,
    durable: Arc<dyn KeyValueStore>,
    session_scoped: Arc<dyn KeyValueStore>,
    changes: broadcast::Sender<AuthChange>,
}

impl SupabaseGateway {
    pub fn new(
        settings: SupabaseSettings,
        durable: Arc<dyn KeyValueStore>,
        session_scoped: Arc<dyn KeyValueStore>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            storage_key: format!("sb-{}-auth-token", settings.project_ref()),
            client,
            settings,
            durable,
            session_scoped,
            changes,
        })
    }

    /// Durable-store key holding the serialized session.
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.settings.base_url(), path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.settings.base_url(), table)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", self.settings.anon_key.expose_secret())
    }

    /// PostgREST request carrying the user's token, or the anon key when
    /// nobody is signed in.
    fn rest_request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self
            .stored_session()
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.settings.anon_key.expose_secret().clone());

        self.request(method, &self.rest_url(table))
            .bearer_auth(bearer)
            .header(header::ACCEPT, PGRST_OBJECT)
    }

    fn publish(&self, event: AuthEvent, session: Option<Session>) {
        // No receivers is fine; the store may not have subscribed yet.
        let _ = self.changes.send(AuthChange { event, session });
    }

    fn stored_session(&self) -> Option<Session> {
        let raw = self.durable.get(&self.storage_key)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(key = %self.storage_key, error = %e, "Discarding unreadable stored session");
                None
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<(), GatewayError> {
        let raw = serde_json::to_string(session)
            .map_err(|e| GatewayError::Unexpected(anyhow!("Failed to serialize session: {e}")))?;
        self.durable.set(&self.storage_key, raw)?;
        Ok(())
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, GatewayError> {
        let response = self
            .request(Method::POST, &self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = ProviderError::read(response).await;
            tracing::debug!(grant_type, status = %error.status, code = ?error.code, "Token grant rejected");
            return Err(error.into_auth_error().into());
        }

        let session: Session = response.json().await?;
        let session = session.with_expiry_from(Utc::now());
        self.persist(&session)?;
        Ok(session)
    }

    /// Exchange the refresh token for a new session and announce it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;

        tracing::info!(user_id = %session.user_id(), "Session refreshed");
        self.publish(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    fn discard_session(&self) {
        if let Err(e) = self.durable.remove(&self.storage_key) {
            tracing::warn!(key = %self.storage_key, error = %e, "Failed to remove stored session");
        }
    }

    /// The provider no longer honours the stored session: drop it and
    /// announce the sign-out.
    fn expire_session(&self) {
        self.discard_session();
        self.publish(AuthEvent::SignedOut, None);
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, GatewayError> {
        let response = self
            .rest_request(Method::GET, "users")
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(Some(response.json().await?));
        }

        let error = ProviderError::read(response).await;
        if error.is_code(NO_ROWS) {
            return Ok(None);
        }
        Err(error.into_unexpected("Profile lookup failed"))
    }

    async fn current_user(&self) -> Result<AuthUser, GatewayError> {
        let session = self
            .stored_session()
            .ok_or_else(|| GatewayError::Unexpected(anyhow!("No stored session to load the user from")))?;

        let response = self
            .request(Method::GET, &self.auth_url("user"))
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::read(response)
                .await
                .into_unexpected("User lookup failed"));
        }

        Ok(response.json().await?)
    }

    async fn create_profile(&self, user_id: &str) -> Result<Profile, GatewayError> {
        let user = self.current_user().await?;
        if user.id != user_id {
            return Err(GatewayError::Unexpected(anyhow!(
                "Signed-in user {} does not match requested profile {}",
                user.id,
                user_id
            )));
        }

        let response = self
            .rest_request(Method::POST, "users")
            .header("Prefer", "return=representation")
            .json(&NewProfile::for_user(&user))
            .send()
            .await?;

        if response.status().is_success() {
            tracing::info!(user_id = %user_id, "User profile created");
            return Ok(response.json().await?);
        }

        let error = ProviderError::read(response).await;
        if error.is_code(UNIQUE_VIOLATION) || error.status == StatusCode::CONFLICT {
            tracing::info!(user_id = %user_id, "Profile already exists, fetching it");
            return self.fetch_profile(user_id).await?.ok_or_else(|| {
                GatewayError::Unexpected(anyhow!("Profile {user_id} vanished after conflict"))
            });
        }

        Err(error.into_unexpected("Profile creation failed"))
    }

    async fn fetch_or_create_profile(&self, user_id: &str) -> Result<Profile, GatewayError> {
        match self.fetch_profile(user_id).await? {
            Some(profile) => Ok(profile),
            None => {
                tracing::info!(user_id = %user_id, "User profile not found, creating it");
                self.create_profile(user_id).await
            }
        }
    }

    /// Keep the stored session fresh until `shutdown` is cancelled. A refresh
    /// the provider rejects signs the user out.
    pub fn spawn_auto_refresh(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Session auto-refresh started");

            loop {
                let wait = self.next_refresh_in();

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Session auto-refresh shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                let Some(session) = self.stored_session() else {
                    continue;
                };
                if !session.expires_within(Utc::now(), chrono::Duration::seconds(EXPIRY_MARGIN_SECS)) {
                    continue;
                }

                match self.refresh(&session.refresh_token).await {
                    Ok(_) => {}
                    Err(GatewayError::Auth(e)) => {
                        tracing::warn!(error = %e, reason = e.kind(), "Refresh rejected, signing out");
                        self.expire_session();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Session refresh failed, will retry");
                    }
                }
            }
        })
    }

    fn next_refresh_in(&self) -> Duration {
        let Some(due) = self
            .stored_session()
            .and_then(|session| session.refresh_due(chrono::Duration::seconds(EXPIRY_MARGIN_SECS)))
        else {
            return IDLE_REFRESH_POLL;
        };

        due.signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .clamp(Duration::from_secs(1), IDLE_REFRESH_POLL)
    }
}

#[async_trait]
impl AuthGateway for SupabaseGateway {
    #[tracing::instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;

        tracing::info!(user_id = %session.user_id(), "Signed in with password");
        self.publish(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        let access_token = self.stored_session().map(|session| session.access_token);

        for store in [&self.durable, &self.session_scoped] {
            match clear_provider_keys(&**store) {
                Ok(removed) => tracing::debug!(removed, "Cleared provider keys"),
                Err(e) => tracing::warn!(error = %e, "Local sign out left keys behind"),
            }
        }

        if let Some(token) = access_token {
            let revoke = self
                .request(Method::POST, &self.auth_url("logout"))
                .query(&[("scope", "local")])
                .bearer_auth(token);

            tokio::spawn(async move {
                match revoke.send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!("Remote session revoked");
                    }
                    Ok(response) => {
                        tracing::debug!(status = %response.status(), "Remote revoke refused");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Remote revoke failed");
                    }
                }
            });
        }

        self.publish(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        let Some(session) = self.stored_session() else {
            return Ok(None);
        };

        if !session.expires_within(Utc::now(), chrono::Duration::seconds(EXPIRY_MARGIN_SECS)) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(GatewayError::Auth(e)) => {
                tracing::warn!(error = %e, reason = e.kind(), "Stored session could not be refreshed");
                self.expire_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn user_profile(&self, user_id: &str) -> Option<Profile> {
        match self.fetch_or_create_profile(user_id).await {
            Ok(profile) => Some(profile),
            Err(e) if e.is_network() => {
                PROFILE_FETCH_FAILURES.with_label_values(&["network"]).inc();
                tracing::warn!(user_id = %user_id, error = %e, "Profile request did not complete");
                None
            }
            Err(e) => {
                PROFILE_FETCH_FAILURES.with_label_values(&["unexpected"]).inc();
                tracing::error!(user_id = %user_id, error = %e, "Failed to load user profile");
                None
            }
        }
    }

    fn subscribe(&self) -> SessionChanges {
        SessionChanges::new(self.changes.subscribe())
    }
}
