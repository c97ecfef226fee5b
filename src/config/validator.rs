//! Settings validation: reject combinations that would weaken tenant isolation.

use crate::config::Settings;
use crate::error::ConfigError;

pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.dev_fallback && settings.environment.is_production() {
        return Err(ConfigError::Validation(
            "TENANT_DEV_FALLBACK cannot be enabled when APP_ENV is production".into(),
        ));
    }
    if settings.resolve_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "TENANT_RESOLVE_TIMEOUT_MS must be greater than zero".into(),
        ));
    }
    if settings.max_connections == 0 {
        return Err(ConfigError::Validation(
            "TENANT_POOL_MAX_CONNECTIONS must be greater than zero".into(),
        ));
    }
    if settings.central_database.starts_with(&settings.data_dir) {
        return Err(ConfigError::Validation(format!(
            "central database {} must live outside the tenant data directory {}",
            settings.central_database.display(),
            settings.data_dir.display()
        )));
    }
    Ok(())
}
