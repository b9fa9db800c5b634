mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{profile, session, EMAIL, PASSWORD};
use http_body_util::BodyExt;
use portal_frontend::config::AuthSettings;
use portal_frontend::services::auth_gateway::MockGateway;
use portal_frontend::services::session_store::SessionStore;
use portal_frontend::startup::build_router;
use portal_frontend::AppState;
use std::sync::Arc;
use tower::util::ServiceExt;

fn auth_settings() -> AuthSettings {
    AuthSettings {
        sign_out_settle_ms: 0,
        sign_in_settle_timeout_ms: 1_000,
        auto_refresh: false,
    }
}

fn mock_gateway() -> MockGateway {
    MockGateway::new()
        .with_account(EMAIL, PASSWORD, session("user-1"))
        .with_profile(profile("user-1"))
}

async fn app_with(gateway: Arc<MockGateway>) -> (Router, SessionStore) {
    let store = SessionStore::start(gateway);
    store.wait_until_settled().await;
    let app = build_router(AppState::new(store.clone(), auth_settings()));
    (app, store)
}

async fn signed_in_app() -> (Router, SessionStore) {
    let gateway = Arc::new(mock_gateway().with_current_session(session("user-1")));
    app_with(gateway).await
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn login_request(email: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("HX-Request", "true")
        .body(Body::from(format!(
            "email={}&password={}",
            email.replace('@', "%40"),
            password
        )))
        .unwrap()
}

#[tokio::test]
async fn health_check_works() {
    let (app, _store) = app_with(Arc::new(mock_gateway())).await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn protected_page_redirects_signed_out_visitor() {
    let (app, _store) = app_with(Arc::new(mock_gateway())).await;

    let response = app.clone().oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/");

    let htmx = Request::builder()
        .uri("/modules/crm")
        .header("HX-Request", "true")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(htmx).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["hx-redirect"], "/");
}

#[tokio::test]
async fn login_page_renders_for_signed_out_visitor() {
    let (app, _store) = app_with(Arc::new(mock_gateway())).await;

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let body = body_text(response).await;
    assert!(body.contains("hx-post=\"/login\""));
}

#[tokio::test]
async fn login_page_redirects_signed_in_user() {
    let (app, _store) = signed_in_app().await;

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");
}

#[tokio::test]
async fn dashboard_lists_modules_for_signed_in_user() {
    let (app, _store) = signed_in_app().await;

    let response = app.oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains("Olive Ops"));
    assert!(body.contains("/modules/purchasing"));
    assert!(body.contains("Finance &amp; Banking"));
}

#[tokio::test]
async fn module_pages() {
    let (app, _store) = signed_in_app().await;

    let response = app.clone().oneshot(get("/modules/crm")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("coming soon"));

    let response = app.oneshot(get("/modules/time-travel")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn loading_page_shown_while_bootstrapping() {
    let gateway = Arc::new(mock_gateway());
    let gate = gateway.hold_next_session_fetch();
    let store = SessionStore::start(gateway);
    let app = build_router(AppState::new(store.clone(), auth_settings()));

    let response = app.oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Loading"));

    gate.release();
    store.shutdown().await;
}

#[tokio::test]
async fn invalid_form_is_rejected_before_sign_in() {
    let gateway = Arc::new(mock_gateway());
    let (app, _store) = app_with(gateway.clone()).await;

    let response = app.oneshot(login_request("not-an-email", "123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains("Please enter a valid email address"));
    assert!(body.contains("Password must be at least 6 characters long"));
    assert_eq!(
        gateway.sign_in_calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn wrong_password_shows_banner() {
    let (app, store) = app_with(Arc::new(mock_gateway())).await;

    let response = app
        .oneshot(login_request(EMAIL, "wrong-password"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("hx-redirect"));

    let body = body_text(response).await;
    assert!(body.contains("Incorrect email or password. Please check your credentials and try again."));
    assert!(store.snapshot().user().is_none());
}

#[tokio::test]
async fn successful_login_redirects_to_dashboard() {
    let (app, store) = app_with(Arc::new(mock_gateway())).await;

    let response = app.oneshot(login_request(EMAIL, PASSWORD)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["hx-redirect"], "/dashboard");
    assert!(store.snapshot().user().is_some());

    store.shutdown().await;
}

#[tokio::test]
async fn logout_clears_session_and_returns_to_login() {
    let (app, store) = signed_in_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/logout")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/");
    assert!(store.snapshot().user().is_none());

    let response = app.oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn auth_state_reports_phase_without_tokens() {
    let (app, _store) = signed_in_app().await;

    let response = app.oneshot(get("/auth/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    let state: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(state["phase"], "authenticated");
    assert_eq!(state["user_id"], "user-1");
    assert_eq!(state["loading"], false);
    assert!(!body.contains("access-user-1"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_portal_metrics() {
    let (app, _store) = app_with(Arc::new(mock_gateway())).await;

    app.clone().oneshot(get("/health")).await.unwrap();
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("portal_http_requests_total"));
}
