use crate::middleware::auth::{redirect_response, DEFAULT_AUTHENTICATED_ROUTE, LOGIN_ROUTE};
use crate::utils::validation::{has_errors, Field, FieldErrors, LoginForm};
use crate::AppState;
use askama::Template;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub form: LoginFormView,
}

/// The login form fragment; HTMX swaps it in place after each submit.
#[derive(Template)]
#[template(path = "login_form.html")]
pub struct LoginFormTemplate {
    pub form: LoginFormView,
}

#[derive(Debug, Default)]
pub struct LoginFormView {
    pub email: String,
    pub email_error: Option<String>,
    pub password_error: Option<String>,
    pub banner: Option<String>,
}

impl LoginFormView {
    fn with_field_errors(email: &str, errors: &FieldErrors) -> Self {
        Self {
            email: email.to_string(),
            email_error: errors.get(&Field::Email).map(ToString::to_string),
            password_error: errors.get(&Field::Password).map(ToString::to_string),
            banner: None,
        }
    }

    fn with_banner(email: &str, banner: String) -> Self {
        Self {
            email: email.to_string(),
            banner: Some(banner),
            ..Self::default()
        }
    }
}

pub async fn login_page() -> impl IntoResponse {
    LoginTemplate {
        form: LoginFormView::default(),
    }
}

pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let errors = form.errors();
    if has_errors(&errors) {
        return LoginFormTemplate {
            form: LoginFormView::with_field_errors(&form.email, &errors),
        }
        .into_response();
    }

    if let Err(e) = state.session_store.sign_in(&form.email, &form.password).await {
        return LoginFormTemplate {
            form: LoginFormView::with_banner(&form.email, e.to_string()),
        }
        .into_response();
    }

    // The store learns about the new session from the gateway's change
    // notification; wait for it so the dashboard does not bounce back here.
    match state
        .session_store
        .wait_for_user(state.auth.sign_in_settle_timeout())
        .await
    {
        Some(user) => tracing::info!(user_id = %user.id, "User logged in"),
        None => tracing::warn!("Signed in but the session has not landed yet"),
    }

    redirect_response(&headers, DEFAULT_AUTHENTICATED_ROUTE)
}

/// Sign out, give in-flight work a moment to observe it, then go to the
/// login page whatever the outcome.
pub async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.session_store.sign_out().await;
    tokio::time::sleep(state.auth.sign_out_settle()).await;

    redirect_response(&headers, LOGIN_ROUTE)
}
