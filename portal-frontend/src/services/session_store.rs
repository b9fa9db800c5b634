//! Process-wide authentication state.
//!
//! The store owns `{session, profile, loading, signing_out}` in a
//! `watch` channel. Every write goes through [`SessionStore::apply`], a
//! single `send_if_modified` step, so readers never see a half-applied
//! change and nothing is written once [`SessionStore::shutdown`] has run.
//!
//! Asynchronous work (bootstrap, profile loads) records the generation it
//! started under and only lands if that generation is still current, no
//! sign-out is in progress and the user has not changed.

use crate::models::{AuthUser, Profile, Role, Session};
use crate::services::auth_gateway::{AuthChange, AuthError, AuthGateway, GatewayError, SessionChanges};
use crate::services::metrics::{SIGN_IN_TOTAL, SIGN_OUT_TOTAL};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Bootstrapping,
    Authenticated,
    Unauthenticated,
    SigningIn,
    SigningOut,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    session: Option<Session>,
    profile: Option<Profile>,
    bootstrapping: bool,
    sign_ins_in_flight: usize,
    sign_outs_in_flight: usize,
    generation: u64,
}

impl SessionState {
    pub(crate) fn bootstrapping() -> Self {
        Self {
            bootstrapping: true,
            ..Self::default()
        }
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|session| &session.user)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn loading(&self) -> bool {
        self.bootstrapping || self.sign_ins_in_flight > 0 || self.sign_outs_in_flight > 0
    }

    pub fn signing_out(&self) -> bool {
        self.sign_outs_in_flight > 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> AuthPhase {
        if self.signing_out() {
            AuthPhase::SigningOut
        } else if self.sign_ins_in_flight > 0 {
            AuthPhase::SigningIn
        } else if self.bootstrapping {
            AuthPhase::Bootstrapping
        } else if self.session.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Unauthenticated
        }
    }

    /// Profile name, then the account email, then a generic label.
    pub fn display_name(&self) -> String {
        if let Some(profile) = &self.profile {
            return profile.display_name().to_string();
        }

        self.user()
            .and_then(|user| user.email.clone())
            .unwrap_or_else(|| "User".to_string())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase(),
            loading: self.loading(),
            signing_out: self.signing_out(),
            authenticated: self.session.is_some(),
            user_id: self.user().map(|user| user.id.clone()),
            email: self.user().and_then(|user| user.email.clone()),
            display_name: self.session.as_ref().map(|_| self.display_name()),
            role: self.profile.as_ref().map(|profile| profile.role),
            generation: self.generation,
        }
    }

    fn replace_session(&mut self, session: Option<Session>) {
        let same_user = match (self.user(), session.as_ref()) {
            (Some(current), Some(next)) => current.id == next.user.id,
            _ => false,
        };

        self.session = session;
        self.generation += 1;
        if !same_user {
            self.profile = None;
        }
    }

    /// Whether a profile load started under `generation` for `user_id` may
    /// still land.
    fn accepts_profile(&self, user_id: &str, generation: u64) -> bool {
        !self.signing_out()
            && self.generation == generation
            && self.user().is_some_and(|user| user.id == user_id)
    }
}

#[cfg(test)]
impl SessionState {
    pub(crate) fn signed_in_as(user_id: &str) -> Self {
        let mut state = Self::default();
        state.replace_session(Some(Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            expires_at: None,
            user: AuthUser {
                id: user_id.to_string(),
                email: Some(format!("{user_id}@example.com")),
                user_metadata: Default::default(),
            },
        }));
        state
    }
}

/// Serializable snapshot for the `/auth/state` endpoint. Carries no tokens.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: AuthPhase,
    pub loading: bool,
    pub signing_out: bool,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub generation: u64,
}

#[derive(Debug, Error)]
pub enum SignInError {
    /// The identity service turned the credentials down.
    #[error(transparent)]
    Rejected(#[from] AuthError),

    #[error("An unexpected error occurred during sign in")]
    Unexpected(#[source] GatewayError),
}

struct StoreInner {
    gateway: Arc<dyn AuthGateway>,
    state: watch::Sender<SessionState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Subscribe to `gateway`, then restore any persisted session in the
    /// background. Must be called from within a Tokio runtime.
    pub fn start(gateway: Arc<dyn AuthGateway>) -> Self {
        let changes = gateway.subscribe();
        let (state, _) = watch::channel(SessionState::bootstrapping());

        let store = Self {
            inner: Arc::new(StoreInner {
                gateway,
                state,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        };

        store.inner.tasks.spawn(store.clone().listen(changes));
        let started_under = store.snapshot().generation;
        store.inner.tasks.spawn(store.clone().bootstrap(started_under));
        store
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Apply `write` atomically. Returns false when the write was declined
    /// or the store has shut down.
    fn apply(&self, write: impl FnOnce(&mut SessionState) -> bool) -> bool {
        let shutdown = &self.inner.shutdown;
        self.inner.state.send_if_modified(|state| {
            if shutdown.is_cancelled() {
                return false;
            }
            write(state)
        })
    }

    async fn listen(self, mut changes: SessionChanges) {
        loop {
            let change = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            self.handle_change(change);
        }

        changes.unsubscribe();
        tracing::debug!("Session change listener stopped");
    }

    fn handle_change(&self, change: AuthChange) {
        let AuthChange { event, session } = change;
        let mut profile_load = None;

        let applied = self.apply(|state| {
            if state.signing_out() {
                tracing::debug!(event = ?event, "Ignoring session change during sign out");
                return false;
            }
            // Already applied, e.g. a refreshed session bootstrap wrote first.
            if state.session == session {
                tracing::debug!(event = ?event, "Session unchanged");
                return false;
            }

            state.replace_session(session);
            match state.user() {
                Some(user) => profile_load = Some((user.id.clone(), state.generation)),
                None => state.bootstrapping = false,
            }
            true
        });

        if applied {
            tracing::debug!(event = ?event, "Session change applied");
        }

        if let Some((user_id, generation)) = profile_load {
            let store = self.clone();
            self.inner.tasks.spawn(async move {
                store.load_profile(user_id, generation).await;
            });
        }
    }

    async fn bootstrap(self, started_under: u64) {
        let restored = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            restored = self.inner.gateway.current_session() => restored,
        };

        let session = match restored {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore session");
                None
            }
        };

        let mut settles_under = started_under;
        let mut profile_load = None;
        if let Some(session) = session {
            self.apply(|state| {
                // A notification or sign-out got there first.
                if state.signing_out() || state.generation != started_under {
                    return false;
                }
                state.replace_session(Some(session));
                settles_under = state.generation;
                profile_load = state.user().map(|user| (user.id.clone(), state.generation));
                true
            });
        }

        if let Some((user_id, generation)) = profile_load {
            tracing::info!(user_id = %user_id, "Restored persisted session");
            self.load_profile(user_id, generation).await;
        }

        // Whichever write replaced the session since then settles loading.
        self.apply(|state| {
            if !state.bootstrapping || state.generation != settles_under {
                return false;
            }
            state.bootstrapping = false;
            true
        });
    }

    async fn load_profile(&self, user_id: String, generation: u64) {
        let profile = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            profile = self.inner.gateway.user_profile(&user_id) => profile,
        };

        if profile.is_none() {
            tracing::warn!(user_id = %user_id, "Continuing without a user profile");
        }

        let applied = self.apply(|state| {
            if !state.accepts_profile(&user_id, generation) {
                return false;
            }
            if profile.is_some() {
                state.profile = profile;
            }
            state.bootstrapping = false;
            true
        });

        if !applied {
            tracing::debug!(user_id = %user_id, generation, "Discarded stale profile load");
        }
    }

    /// Sign in with a password. Success is reflected in the state once the
    /// gateway's `SignedIn` change arrives, not here.
    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SignInError> {
        let _in_flight = SignInGuard::enter(self);

        match self.inner.gateway.sign_in(email, password).await {
            Ok(session) => {
                SIGN_IN_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!(user_id = %session.user_id(), "Sign in succeeded");
                Ok(())
            }
            Err(GatewayError::Auth(e)) => {
                SIGN_IN_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::info!(reason = e.kind(), "Sign in rejected");
                Err(SignInError::Rejected(e))
            }
            Err(e) => {
                SIGN_IN_TOTAL.with_label_values(&["unexpected"]).inc();
                tracing::error!(error = %e, "Sign in failed");
                Err(SignInError::Unexpected(e))
            }
        }
    }

    /// Clear local state immediately, then sign out through the gateway.
    /// Gateway failures are logged, never returned.
    pub async fn sign_out(&self) {
        let _in_flight = SignOutGuard::enter(self);
        SIGN_OUT_TOTAL.inc();

        if let Err(e) = self.inner.gateway.sign_out().await {
            tracing::warn!(error = %e, "Gateway sign out failed, local state already cleared");
        }

        tracing::info!("Signed out");
    }

    async fn wait_until(&self, done: impl Fn(&SessionState) -> bool) -> Option<SessionState> {
        let mut receiver = self.watch();

        loop {
            {
                let state = receiver.borrow_and_update();
                if done(&state) {
                    return Some(state.clone());
                }
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return None,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Resolves once nothing is loading. Returns the state at that point,
    /// or the last state if the store shut down first.
    pub async fn wait_until_settled(&self) -> SessionState {
        match self.wait_until(|state| !state.loading()).await {
            Some(state) => state,
            None => self.snapshot(),
        }
    }

    /// Wait up to `timeout` for a signed-in user.
    pub async fn wait_for_user(&self, timeout: Duration) -> Option<AuthUser> {
        let state = tokio::time::timeout(timeout, self.wait_until(|state| state.user().is_some()))
            .await
            .ok()??;
        state.user().cloned()
    }

    /// Stop background work and discard every later write.
    pub async fn shutdown(&self) {
        let token = &self.inner.shutdown;
        // Cancelling under the channel lock orders it against in-flight writes.
        self.inner.state.send_if_modified(|_| {
            token.cancel();
            false
        });

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("Session store shut down");
    }
}

struct SignInGuard<'a> {
    store: &'a SessionStore,
}

impl<'a> SignInGuard<'a> {
    fn enter(store: &'a SessionStore) -> Self {
        store.apply(|state| {
            state.sign_ins_in_flight += 1;
            true
        });
        Self { store }
    }
}

impl Drop for SignInGuard<'_> {
    fn drop(&mut self) {
        // Runs on every exit, including a dropped request future.
        self.store.apply(|state| {
            state.sign_ins_in_flight = state.sign_ins_in_flight.saturating_sub(1);
            true
        });
    }
}

struct SignOutGuard<'a> {
    store: &'a SessionStore,
}

impl<'a> SignOutGuard<'a> {
    fn enter(store: &'a SessionStore) -> Self {
        store.apply(|state| {
            state.sign_outs_in_flight += 1;
            state.bootstrapping = false;
            state.replace_session(None);
            true
        });
        Self { store }
    }
}

impl Drop for SignOutGuard<'_> {
    fn drop(&mut self) {
        self.store.apply(|state| {
            state.sign_outs_in_flight = state.sign_outs_in_flight.saturating_sub(1);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth_gateway::{AuthEvent, MockGateway};
    use chrono::Utc;

    fn session(user_id: &str) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            expires_at: None,
            user: AuthUser {
                id: user_id.to_string(),
                email: Some(format!("{user_id}@example.com")),
                user_metadata: Default::default(),
            },
        }
    }

    fn profile(user_id: &str, full_name: Option<&str>) -> Profile {
        Profile {
            id: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            full_name: full_name.map(str::to_string),
            role: Role::Manager,
            phone: None,
            address: None,
            date_of_birth: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_phase_precedence() {
        let mut state = SessionState::bootstrapping();
        assert_eq!(state.phase(), AuthPhase::Bootstrapping);
        assert!(state.loading());

        state.sign_ins_in_flight = 1;
        assert_eq!(state.phase(), AuthPhase::SigningIn);

        state.sign_outs_in_flight = 1;
        assert_eq!(state.phase(), AuthPhase::SigningOut);

        let state = SessionState::default();
        assert_eq!(state.phase(), AuthPhase::Unauthenticated);
        assert!(!state.loading());
    }

    #[test]
    fn test_replace_session_keeps_profile_for_same_user() {
        let mut state = SessionState::default();
        state.replace_session(Some(session("u1")));
        state.profile = Some(profile("u1", Some("Jane")));

        state.replace_session(Some(session("u1")));
        assert!(state.profile.is_some());
        assert_eq!(state.generation(), 2);

        state.replace_session(Some(session("u2")));
        assert!(state.profile.is_none());

        state.replace_session(None);
        assert!(state.user().is_none());
        assert!(state.session().is_none());
    }

    #[test]
    fn test_accepts_profile_fences() {
        let mut state = SessionState::default();
        state.replace_session(Some(session("u1")));
        let generation = state.generation();

        assert!(state.accepts_profile("u1", generation));
        assert!(!state.accepts_profile("u2", generation));
        assert!(!state.accepts_profile("u1", generation - 1));

        state.sign_outs_in_flight = 1;
        assert!(!state.accepts_profile("u1", generation));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut state = SessionState::default();
        state.replace_session(Some(session("u1")));
        assert_eq!(state.display_name(), "u1@example.com");

        state.profile = Some(profile("u1", Some("Jane Doe")));
        assert_eq!(state.display_name(), "Jane Doe");

        let view = state.view();
        assert_eq!(view.phase, AuthPhase::Authenticated);
        assert_eq!(view.role, Some(Role::Manager));
        assert_eq!(view.display_name.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn test_bootstrap_without_session_settles_unauthenticated() {
        let store = SessionStore::start(Arc::new(MockGateway::new()));

        let state = store.wait_until_settled().await;
        assert_eq!(state.phase(), AuthPhase::Unauthenticated);
        assert!(state.user().is_none());

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_writes_discarded_after_shutdown() {
        let store = SessionStore::start(Arc::new(MockGateway::new()));
        store.wait_until_settled().await;
        store.shutdown().await;

        let before = store.snapshot().generation();
        assert!(!store.apply(|state| {
            state.replace_session(Some(session("u1")));
            true
        }));
        assert_eq!(store.snapshot().generation(), before);
        assert!(store.snapshot().user().is_none());
    }

    #[tokio::test]
    async fn test_repeated_change_is_not_reapplied() {
        let store = SessionStore::start(Arc::new(MockGateway::new()));
        store.wait_until_settled().await;

        store.handle_change(AuthChange {
            event: AuthEvent::SignedIn,
            session: Some(session("u1")),
        });
        let generation = store.snapshot().generation();

        store.handle_change(AuthChange {
            event: AuthEvent::TokenRefreshed,
            session: Some(session("u1")),
        });
        assert_eq!(store.snapshot().generation(), generation);

        store.shutdown().await;
    }
}
