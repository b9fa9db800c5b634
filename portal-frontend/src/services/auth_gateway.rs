//! Seam between the session store and the hosted identity service.

use crate::models::{Profile, Session};
use crate::services::storage::StorageError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};

/// Buffered notifications per subscriber before the oldest are dropped.
pub const CHANGE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Sign-in failures the provider reports for expected reasons. The display
/// text is what the login page shows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Incorrect email or password. Please check your credentials and try again.")]
    InvalidCredentials,

    #[error("Please check your email and click the confirmation link before signing in.")]
    EmailUnconfirmed,

    #[error("Too many login attempts. Please wait a few minutes before trying again.")]
    RateLimited,

    #[error("No account found with this email address.")]
    UserNotFound,

    #[error("Unable to sign in. Please check your email and password and try again.")]
    Unknown(String),
}

impl AuthError {
    /// Classify a provider error by its message, machine code or HTTP status.
    pub fn classify(message: &str, error_code: Option<&str>, status: Option<u16>) -> Self {
        let message = message.trim();
        let matches = |expected: &str| message.eq_ignore_ascii_case(expected);

        match error_code {
            Some("invalid_credentials") => return AuthError::InvalidCredentials,
            Some("email_not_confirmed") => return AuthError::EmailUnconfirmed,
            Some("over_request_rate_limit") => return AuthError::RateLimited,
            Some("user_not_found") => return AuthError::UserNotFound,
            _ => {}
        }

        if matches("Invalid login credentials") {
            AuthError::InvalidCredentials
        } else if matches("Email not confirmed") {
            AuthError::EmailUnconfirmed
        } else if matches("Too many requests") || status == Some(429) {
            AuthError::RateLimited
        } else if matches("User not found") {
            AuthError::UserNotFound
        } else {
            AuthError::Unknown(message.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailUnconfirmed => "email_unconfirmed",
            AuthError::RateLimited => "rate_limited",
            AuthError::UserNotFound => "user_not_found",
            AuthError::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Identity service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Session storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl GatewayError {
    /// Connection, timeout or aborted-request failures, as opposed to the
    /// service answering with something we did not expect.
    pub fn is_network(&self) -> bool {
        match self {
            GatewayError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

/// Subscription to session changes. Dropping it, or calling
/// [`SessionChanges::unsubscribe`], releases the subscription.
pub struct SessionChanges {
    receiver: broadcast::Receiver<AuthChange>,
}

impl SessionChanges {
    pub fn new(receiver: broadcast::Receiver<AuthChange>) -> Self {
        Self { receiver }
    }

    /// Next change, or `None` once the gateway has gone away. A lagging
    /// subscriber skips to the oldest change still buffered.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Password sign-in. Expected rejections come back as
    /// [`GatewayError::Auth`]; a success is also announced as `SignedIn`.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError>;

    /// Local sign-out: clear persisted provider state, revoke remotely in
    /// the background. Implementations report success once local state is
    /// gone.
    async fn sign_out(&self) -> Result<(), GatewayError>;

    /// Session persisted from an earlier run, if still usable.
    async fn current_session(&self) -> Result<Option<Session>, GatewayError>;

    /// Fetch the profile for `user_id`, creating it on first sign-in.
    /// Failures are logged by the gateway and reported as `None`.
    async fn user_profile(&self, user_id: &str) -> Option<Profile>;

    fn subscribe(&self) -> SessionChanges;
}

/// A call the mock holds until the test releases it.
#[derive(Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MockAccounts {
    sessions: HashMap<String, (String, Session)>,
    forced_error: Option<AuthError>,
    unexpected_failure: bool,
}

/// Scriptable in-memory gateway for tests and local development.
pub struct MockGateway {
    accounts: Mutex<MockAccounts>,
    current: Mutex<Option<Session>>,
    profiles: Mutex<HashMap<String, Profile>>,
    sign_in_gates: Mutex<VecDeque<Gate>>,
    session_gates: Mutex<VecDeque<Gate>>,
    profile_gates: Mutex<VecDeque<Gate>>,
    fail_sign_out: Mutex<bool>,
    changes: broadcast::Sender<AuthChange>,
    pub sign_in_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            accounts: Mutex::new(MockAccounts::default()),
            current: Mutex::new(None),
            profiles: Mutex::new(HashMap::new()),
            sign_in_gates: Mutex::new(VecDeque::new()),
            session_gates: Mutex::new(VecDeque::new()),
            profile_gates: Mutex::new(VecDeque::new()),
            fail_sign_out: Mutex::new(false),
            changes,
            sign_in_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
        }
    }

    /// Register credentials that sign in to `session`.
    pub fn with_account(self, email: &str, password: &str, session: Session) -> Self {
        lock(&self.accounts)
            .sessions
            .insert(email.to_string(), (password.to_string(), session));
        self
    }

    pub fn with_current_session(self, session: Session) -> Self {
        *lock(&self.current) = Some(session);
        self
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        lock(&self.profiles).insert(profile.id.clone(), profile);
        self
    }

    /// Every sign-in fails with `error` regardless of credentials.
    pub fn fail_sign_in_with(&self, error: AuthError) {
        lock(&self.accounts).forced_error = Some(error);
    }

    /// Every sign-in fails with a non-auth error.
    pub fn fail_sign_in_unexpectedly(&self) {
        lock(&self.accounts).unexpected_failure = true;
    }

    pub fn fail_sign_out(&self) {
        *lock(&self.fail_sign_out) = true;
    }

    pub fn hold_next_sign_in(&self) -> Gate {
        let gate = Gate::new();
        lock(&self.sign_in_gates).push_back(gate.clone());
        gate
    }

    /// Hold the next `current_session` call until the returned gate is released.
    pub fn hold_next_session_fetch(&self) -> Gate {
        let gate = Gate::new();
        lock(&self.session_gates).push_back(gate.clone());
        gate
    }

    /// Hold the next `user_profile` call until the returned gate is released.
    pub fn hold_next_profile_fetch(&self) -> Gate {
        let gate = Gate::new();
        lock(&self.profile_gates).push_back(gate.clone());
        gate
    }

    /// Publish a change as if the provider had raised it. The stored
    /// session is left alone.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.changes.send(AuthChange { event, session });
    }

    pub fn current(&self) -> Option<Session> {
        lock(&self.current).clone()
    }
}

#[async_trait]
impl AuthGateway for MockGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.sign_in_gates).pop_front();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let session = {
            let accounts = lock(&self.accounts);
            if accounts.unexpected_failure {
                return Err(GatewayError::Unexpected(anyhow::anyhow!(
                    "mock identity service unavailable"
                )));
            }
            if let Some(error) = &accounts.forced_error {
                return Err(error.clone().into());
            }
            match accounts.sessions.get(email) {
                Some((expected, session)) if expected == password => session.clone(),
                _ => return Err(AuthError::InvalidCredentials.into()),
            }
        };

        *lock(&self.current) = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.current) = None;
        self.emit(AuthEvent::SignedOut, None);

        if *lock(&self.fail_sign_out) {
            return Err(GatewayError::Unexpected(anyhow::anyhow!(
                "mock revoke failed"
            )));
        }
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        let gate = lock(&self.session_gates).pop_front();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(self.current())
    }

    async fn user_profile(&self, user_id: &str) -> Option<Profile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.profile_gates).pop_front();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        lock(&self.profiles).get(user_id).cloned()
    }

    fn subscribe(&self) -> SessionChanges {
        SessionChanges::new(self.changes.subscribe())
    }
}
