use crate::models::{find_module, DashboardModule};
use crate::services::session_store::SessionView;
use crate::AppState;
use askama::Template;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

#[derive(Template)]
#[template(path = "module.html")]
pub struct ModuleTemplate {
    pub module: &'static DashboardModule,
    pub display_name: String,
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// Current session state without tokens. Polled by the loading page.
pub async fn auth_state(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session_store.snapshot().view())
}

/// Placeholder page for a business module that is not built yet.
pub async fn module_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ModuleTemplate, AppError> {
    let module = find_module(&id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown module: {id}")))?;

    Ok(ModuleTemplate {
        module,
        display_name: state.session_store.snapshot().display_name(),
    })
}
