use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity-provider user record carried inside every [`Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuthUser {
    pub fn metadata_full_name(&self) -> Option<&str> {
        self.user_metadata
            .get("full_name")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Name used when creating a profile: provider metadata, then the
    /// email's local part, then a generic fallback.
    pub fn default_full_name(&self) -> String {
        if let Some(name) = self.metadata_full_name() {
            return name.to_string();
        }

        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_string()
    }
}

/// Provider-issued session. The user lives inside the session so a user
/// without a session (or the reverse) cannot be represented.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// Unix seconds. Filled from `expires_in` when the provider omits it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn with_expiry_from(mut self, issued_at: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            // An expiry past the representable range is treated as none.
            self.expires_at = issued_at.timestamp().checked_add(self.expires_in);
        }
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// The moment a refresh falls due, `margin` ahead of expiry.
    pub fn refresh_due(&self, margin: Duration) -> Option<DateTime<Utc>> {
        self.expires_at().map(|expires_at| {
            expires_at
                .checked_sub_signed(margin)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    /// True when the access token is expired, or will be within `margin`.
    /// Sessions without an expiry never expire.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.refresh_due(margin).is_some_and(|due| due <= now)
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Manager => "manager",
        }
    }
}

/// Application-level row from the `users` table, keyed by the provider user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// Insert payload for a first-time profile.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

impl NewProfile {
    pub fn for_user(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            full_name: user.default_full_name(),
            role: Role::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(email: Option<&str>, metadata: serde_json::Value) -> AuthUser {
        AuthUser {
            id: "user-1".to_string(),
            email: email.map(str::to_string),
            user_metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_default_full_name_prefers_metadata() {
        let user = user(Some("jane@example.com"), json!({"full_name": "Jane Doe"}));
        assert_eq!(user.default_full_name(), "Jane Doe");
    }

    #[test]
    fn test_default_full_name_falls_back_to_email_local_part() {
        let user = user(Some("jane@example.com"), json!({"full_name": "  "}));
        assert_eq!(user.default_full_name(), "jane");
        assert_eq!(self::user(None, json!({})).default_full_name(), "User");
    }

    #[test]
    fn test_new_profile_defaults_to_user_role() {
        let profile = NewProfile::for_user(&user(Some("ops@example.com"), json!({})));
        assert_eq!(profile.role, Role::User);
        assert_eq!(
            serde_json::to_value(&profile).unwrap(),
            json!({"id": "user-1", "email": "ops@example.com", "full_name": "ops", "role": "user"})
        );
    }

    #[test]
    fn test_profile_deserializes_postgrest_row() {
        let row = json!({
            "id": "user-1",
            "email": "jane@example.com",
            "full_name": null,
            "role": "manager",
            "phone": null,
            "address": null,
            "date_of_birth": "1990-04-01",
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00"
        });

        let profile: Profile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.role, Role::Manager);
        assert_eq!(profile.display_name(), "jane@example.com");
    }

    #[test]
    fn test_session_expiry_computed_from_expires_in() {
        let issued = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let session = Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_in: 3600,
            expires_at: None,
            user: user(Some("jane@example.com"), json!({})),
        }
        .with_expiry_from(issued);

        assert_eq!(session.expires_at, Some(1_700_003_600));
        assert!(!session.expires_within(issued, Duration::seconds(60)));
        assert!(session.expires_within(issued + Duration::seconds(3550), Duration::seconds(60)));
    }

    #[test]
    fn test_extreme_expiry_values_do_not_overflow() {
        let issued = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let base = Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_in: i64::MAX,
            expires_at: None,
            user: user(None, json!({})),
        };

        let far = base.clone().with_expiry_from(issued);
        assert_eq!(far.expires_at, None);
        assert!(!far.expires_within(issued, Duration::seconds(60)));

        let earliest = Session {
            expires_at: Some(DateTime::<Utc>::MIN_UTC.timestamp()),
            ..base.clone()
        };
        assert_eq!(earliest.refresh_due(Duration::seconds(60)), Some(DateTime::<Utc>::MIN_UTC));
        assert!(earliest.expires_within(issued, Duration::seconds(60)));

        let out_of_range = Session {
            expires_at: Some(i64::MAX),
            ..base
        };
        assert!(out_of_range.refresh_due(Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            token_type: "bearer".into(),
            expires_in: 0,
            expires_at: None,
            user: user(None, json!({})),
        };
        let debug = format!("{:?}", session);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
