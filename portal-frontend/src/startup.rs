use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use service_core::middleware::{request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    app::{auth_state, health_check, module_page},
    auth::{login_handler, login_page, logout_handler},
    metrics::metrics,
    user::dashboard_handler,
};
use crate::middleware::{
    auth::{login_only, require_auth},
    metrics::metrics_middleware,
};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/dashboard", get(dashboard_handler))
        .route("/modules/:id", get(module_page))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let login = Router::new()
        .route("/", get(login_page))
        .route_layer(from_fn_with_state(state.clone(), login_only));

    Router::new()
        .merge(protected)
        .merge(login)
        .route("/login", axum::routing::post(login_handler))
        .route("/logout", get(logout_handler).post(logout_handler))
        .route("/auth/state", get(auth_state))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Outermost, so the trace span sees the request id.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
