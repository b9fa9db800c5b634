use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `APP_SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "APP";

/// Load settings from `<config_dir>/base.yaml`, then overlay `APP_`-prefixed
/// environment variables (nested keys separated by `__`).
///
/// A `.env` file in the working directory is read first when present.
pub fn load_layered<T: DeserializeOwned>(config_dir: &Path) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let settings = Cfg::builder()
        .add_source(File::from(config_dir.join("base.yaml")).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Resolve a service's `config/` directory whether the process runs from the
/// workspace root or from inside the service directory.
pub fn service_config_dir(service_dir: &str) -> Result<PathBuf, AppError> {
    let base_path = std::env::current_dir()?;

    if base_path.ends_with(service_dir) {
        Ok(base_path.join("config"))
    } else {
        Ok(base_path.join(service_dir).join("config"))
    }
}
