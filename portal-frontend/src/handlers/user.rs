use crate::models::{DashboardModule, DASHBOARD_MODULES};
use crate::AppState;
use askama::Template;
use axum::{extract::State, response::IntoResponse};

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub display_name: String,
    pub email: String,
    pub role: Option<&'static str>,
    pub modules: &'static [DashboardModule],
    pub current_page: &'static str,
}

pub async fn dashboard_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session_store.snapshot();

    DashboardTemplate {
        display_name: snapshot.display_name(),
        email: snapshot
            .user()
            .and_then(|user| user.email.clone())
            .unwrap_or_default(),
        role: snapshot.profile().map(|profile| profile.role.as_str()),
        modules: DASHBOARD_MODULES,
        current_page: "dashboard",
    }
}
