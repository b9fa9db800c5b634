use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder project values shipped in `base.yaml`; real deployments
/// override them through `APP_SUPABASE__URL` / `APP_SUPABASE__ANON_KEY`.
pub const DEMO_SUPABASE_URL: &str = "https://demo.supabase.co";
pub const DEMO_ANON_KEY: &str = "demo_anon_key";

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub supabase: SupabaseSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct SupabaseSettings {
    /// Project URL, e.g. `https://abcd1234.supabase.co`.
    pub url: String,
    /// Public anon key sent as the `apikey` header on every request.
    pub anon_key: Secret<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl SupabaseSettings {
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// First DNS label of the project host; names the persisted session key.
    pub fn project_ref(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_string()))
            .and_then(|host| host.split('.').next().map(|label| label.to_string()))
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_demo(&self) -> bool {
        self.url == DEMO_SUPABASE_URL || self.anon_key.expose_secret() == DEMO_ANON_KEY
    }
}

#[derive(Deserialize, Clone)]
pub struct StorageSettings {
    /// JSON file backing the durable key-value store.
    pub durable_path: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthSettings {
    /// Pause between a completed sign-out and the redirect to the login page.
    #[serde(default = "default_sign_out_settle_ms")]
    pub sign_out_settle_ms: u64,
    /// Upper bound on how long the login handler waits for the session to land.
    #[serde(default = "default_sign_in_settle_timeout_ms")]
    pub sign_in_settle_timeout_ms: u64,
    /// Refresh the stored session in the background before it expires.
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

fn default_sign_out_settle_ms() -> u64 {
    100
}

fn default_sign_in_settle_timeout_ms() -> u64 {
    5_000
}

fn default_auto_refresh() -> bool {
    true
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            sign_out_settle_ms: default_sign_out_settle_ms(),
            sign_in_settle_timeout_ms: default_sign_in_settle_timeout_ms(),
            auto_refresh: default_auto_refresh(),
        }
    }
}

impl AuthSettings {
    pub fn sign_out_settle(&self) -> Duration {
        Duration::from_millis(self.sign_out_settle_ms)
    }

    pub fn sign_in_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_in_settle_timeout_ms)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ObservabilitySettings {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector, e.g. `http://tempo:4317`. Export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_service_name() -> String {
    "portal-frontend".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

pub fn get_configuration() -> Result<Settings, AppError> {
    let configuration_directory = service_core::config::service_config_dir("portal-frontend")?;
    service_core::config::load_layered(&configuration_directory)
}
