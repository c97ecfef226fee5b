//! Tenant identifiers and the names derived from them.

use crate::error::TenancyError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Prefix of every tenant database name (`db_<identifier>`).
pub const DATABASE_PREFIX: &str = "db_";

/// File extension of tenant database files in the data directory.
pub const DATABASE_EXTENSION: &str = "sqlite3";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,63}$").expect("static tenant id pattern"))
}

/// Opaque, stable code naming one tenant.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Result<Self, TenancyError> {
        let value = value.into();
        if !identifier_pattern().is_match(&value) {
            return Err(TenancyError::InvalidTenantId(value));
        }
        Ok(TenantId(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic database name for this tenant.
    pub fn database_name(&self) -> String {
        format!("{}{}", DATABASE_PREFIX, self.0)
    }

    /// File name of this tenant's database inside the data directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.database_name(), DATABASE_EXTENSION)
    }

    /// Inverse of [`TenantId::file_name`]; `None` for files that do not follow the convention.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(DATABASE_EXTENSION)?.strip_suffix('.')?;
        let id = stem.strip_prefix(DATABASE_PREFIX)?;
        TenantId::new(id).ok()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::new(s.trim())
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_database_and_file_names() {
        let id = TenantId::new("acme").unwrap();
        assert_eq!(id.database_name(), "db_acme");
        assert_eq!(id.file_name(), "db_acme.sqlite3");
        assert_eq!(TenantId::from_file_name("db_acme.sqlite3"), Some(id));
    }

    #[test]
    fn rejects_identifiers_that_could_escape_the_data_dir() {
        for bad in ["", "../etc", "a/b", "acme.db", "with space", &"x".repeat(64)] {
            assert!(
                matches!(TenantId::new(bad), Err(TenancyError::InvalidTenantId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn ignores_files_outside_the_naming_convention() {
        assert_eq!(TenantId::from_file_name("central.sqlite3"), None);
        assert_eq!(TenantId::from_file_name("db_acme.sqlite3-wal"), None);
        assert_eq!(TenantId::from_file_name("db_.sqlite3"), None);
        assert_eq!(TenantId::from_file_name("db_acme.db"), None);
    }

    #[test]
    fn parses_with_surrounding_whitespace() {
        let id: TenantId = " beta-2 ".parse().unwrap();
        assert_eq!(id.as_str(), "beta-2");
    }
}
