pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use config::AuthSettings;
use services::session_store::SessionStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session_store: SessionStore,
    pub auth: AuthSettings,
}

impl AppState {
    pub fn new(session_store: SessionStore, auth: AuthSettings) -> Self {
        Self {
            session_store,
            auth,
        }
    }
}
