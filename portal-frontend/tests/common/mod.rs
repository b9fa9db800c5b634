#![allow(dead_code)]

use chrono::Utc;
use portal_frontend::models::{AuthUser, Profile, Role, Session};
use portal_frontend::services::session_store::{SessionState, SessionStore};
use std::time::Duration;

pub const EMAIL: &str = "ops@example.com";
pub const PASSWORD: &str = "hunter22";

pub fn session(user_id: &str) -> Session {
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        token_type: "bearer".to_string(),
        expires_in: 3600,
        expires_at: Some(Utc::now().timestamp() + 3600),
        user: AuthUser {
            id: user_id.to_string(),
            email: Some(EMAIL.to_string()),
            user_metadata: Default::default(),
        },
    }
}

pub fn profile(user_id: &str) -> Profile {
    Profile {
        id: user_id.to_string(),
        email: EMAIL.to_string(),
        full_name: Some("Olive Ops".to_string()),
        role: Role::Manager,
        phone: None,
        address: None,
        date_of_birth: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Wait until `done` holds for the store state, failing the test after a second.
pub async fn wait_for(store: &SessionStore, done: impl Fn(&SessionState) -> bool) -> SessionState {
    let mut receiver = store.watch();
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            {
                let state = receiver.borrow_and_update();
                if done(&state) {
                    return state.clone();
                }
            }
            receiver.changed().await.expect("store dropped");
        }
    })
    .await
    .expect("state never reached")
}
