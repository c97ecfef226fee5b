//! Runtime settings from the environment. Values are read once at startup; handles keep their
//! own immutable configuration snapshot afterward.

use crate::error::ConfigError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "data/tenants";
pub const DEFAULT_CENTRAL_DATABASE: &str = "data/central.sqlite3";
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            _ => Err(ConfigError::InvalidValue {
                key: "APP_ENV",
                value: s.to_string(),
            }),
        }
    }
}

/// Durable source `discover()` rebuilds the registry from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// One `db_<id>.sqlite3` file per tenant in the data directory.
    Directory,
    /// One row per tenant in the central `_sys_tenants` table.
    RegistryTable,
}

impl std::str::FromStr for DiscoverySource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "directory" | "dir" => Ok(DiscoverySource::Directory),
            "registry" | "table" => Ok(DiscoverySource::RegistryTable),
            _ => Err(ConfigError::InvalidValue {
                key: "TENANT_DISCOVERY",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub central_database: PathBuf,
    pub environment: Environment,
    /// First-known-tenant fallback for callers without an assignment. Never honoured in
    /// production.
    pub dev_fallback: bool,
    pub discovery: DiscoverySource,
    /// Deadline for tenant resolution and liveness probes on the request path.
    pub resolve_timeout: Duration,
    pub max_connections: u32,
}

impl Settings {
    /// Settings rooted at `root`: tenants in `root/tenants`, central database in
    /// `root/central.sqlite3`. Production environment, fallback off.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Settings {
            data_dir: root.join("tenants"),
            central_database: root.join("central.sqlite3"),
            environment: Environment::Production,
            dev_fallback: false,
            discovery: DiscoverySource::Directory,
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test map). Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("TENANT_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into());
        let central_database =
            lookup("CENTRAL_DATABASE_PATH").unwrap_or_else(|| DEFAULT_CENTRAL_DATABASE.into());
        let environment = match lookup("APP_ENV") {
            Some(v) => v.parse()?,
            None => Environment::Production,
        };
        let dev_fallback = match lookup("TENANT_DEV_FALLBACK") {
            Some(v) => parse_bool("TENANT_DEV_FALLBACK", &v)?,
            None => false,
        };
        let discovery = match lookup("TENANT_DISCOVERY") {
            Some(v) => v.parse()?,
            None => DiscoverySource::Directory,
        };
        let resolve_timeout_ms = match lookup("TENANT_RESOLVE_TIMEOUT_MS") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "TENANT_RESOLVE_TIMEOUT_MS",
                value: v.clone(),
            })?,
            None => DEFAULT_RESOLVE_TIMEOUT_MS,
        };
        let max_connections = match lookup("TENANT_POOL_MAX_CONNECTIONS") {
            Some(v) => v.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: "TENANT_POOL_MAX_CONNECTIONS",
                value: v.clone(),
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let settings = Settings {
            data_dir: PathBuf::from(data_dir),
            central_database: PathBuf::from(central_database),
            environment,
            dev_fallback,
            discovery,
            resolve_timeout: Duration::from_millis(resolve_timeout_ms),
            max_connections,
        };
        crate::config::validate(&settings)?;
        Ok(settings)
    }

    /// Whether the development fallback may actually be used.
    pub fn dev_fallback_active(&self) -> bool {
        self.dev_fallback && !self.environment.is_production()
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_production_without_fallback() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.environment, Environment::Production);
        assert!(!settings.dev_fallback);
        assert!(!settings.dev_fallback_active());
        assert_eq!(settings.discovery, DiscoverySource::Directory);
        assert_eq!(settings.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(settings.resolve_timeout, Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS));
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("TENANT_DATA_DIR", "/srv/tenants"),
            ("APP_ENV", "development"),
            ("TENANT_DEV_FALLBACK", "true"),
            ("TENANT_DISCOVERY", "registry"),
            ("TENANT_RESOLVE_TIMEOUT_MS", "250"),
            ("TENANT_POOL_MAX_CONNECTIONS", "2"),
        ]))
        .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/tenants"));
        assert!(settings.dev_fallback_active());
        assert_eq!(settings.discovery, DiscoverySource::RegistryTable);
        assert_eq!(settings.resolve_timeout, Duration::from_millis(250));
        assert_eq!(settings.max_connections, 2);
    }

    #[test]
    fn fallback_in_production_is_rejected_at_load() {
        let err = Settings::from_lookup(lookup(&[("TENANT_DEV_FALLBACK", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn malformed_values_name_their_key() {
        let err = Settings::from_lookup(lookup(&[("TENANT_RESOLVE_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "TENANT_RESOLVE_TIMEOUT_MS", .. }));
        let err = Settings::from_lookup(lookup(&[("APP_ENV", "moon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "APP_ENV", .. }));
    }
}
