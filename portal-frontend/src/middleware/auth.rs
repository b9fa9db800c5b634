//! Route guard: decides from a session snapshot whether a page renders,
//! redirects, or shows the loading screen.

use crate::services::session_store::SessionState;
use crate::AppState;
use askama::Template;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

pub const LOGIN_ROUTE: &str = "/";
pub const DEFAULT_AUTHENTICATED_ROUTE: &str = "/dashboard";

pub const HX_REQUEST: &str = "hx-request";
pub const HX_REDIRECT: &str = "hx-redirect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Requires a signed-in user.
    Protected,
    /// Only for signed-out visitors, e.g. the login page.
    LoginOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    ShowLoading,
    Redirect(&'static str),
    Render,
}

pub fn evaluate(state: &SessionState, kind: RouteKind) -> GuardDecision {
    if state.loading() {
        return GuardDecision::ShowLoading;
    }

    match (kind, state.user().is_some()) {
        (RouteKind::Protected, false) => GuardDecision::Redirect(LOGIN_ROUTE),
        (RouteKind::LoginOnly, true) => GuardDecision::Redirect(DEFAULT_AUTHENTICATED_ROUTE),
        _ => GuardDecision::Render,
    }
}

#[derive(Template)]
#[template(path = "loading.html")]
pub struct LoadingTemplate {
    pub path: String,
}

/// HTMX requests get `HX-Redirect` so the whole page navigates; plain
/// requests get a 303.
pub fn redirect_response(headers: &HeaderMap, to: &'static str) -> Response {
    if headers.contains_key(HX_REQUEST) {
        let mut response = StatusCode::OK.into_response();
        response
            .headers_mut()
            .insert(HX_REDIRECT, HeaderValue::from_static(to));
        return response;
    }

    Redirect::to(to).into_response()
}

async fn guard(state: &AppState, kind: RouteKind, request: Request, next: Next) -> Response {
    let snapshot = state.session_store.snapshot();

    match evaluate(&snapshot, kind) {
        GuardDecision::Render => next.run(request).await,
        GuardDecision::Redirect(to) => {
            tracing::debug!(
                path = %request.uri().path(),
                to,
                phase = ?snapshot.phase(),
                "Route guard redirect"
            );
            redirect_response(request.headers(), to)
        }
        GuardDecision::ShowLoading => LoadingTemplate {
            path: request.uri().path().to_string(),
        }
        .into_response(),
    }
}

pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    guard(&state, RouteKind::Protected, request, next).await
}

pub async fn login_only(State(state): State<AppState>, request: Request, next: Next) -> Response {
    guard(&state, RouteKind::LoginOnly, request, next).await
}
