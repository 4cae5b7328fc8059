//! Connection-related data models.
//!
//! This module defines the backend kind selected by configuration and the
//! capability set each connector advertises.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    /// Includes MariaDB
    MySql,
    /// File-based
    Sqlite,
}

impl BackendKind {
    /// All supported kinds, in factory order.
    pub const ALL: [BackendKind; 3] = [Self::Postgres, Self::MySql, Self::Sqlite];

    /// Get the display name for this backend kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this backend kind.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::Sqlite => None,
        }
    }

    /// Whether the backend is reached over the network.
    pub fn is_networked(&self) -> bool {
        self.default_port().is_some()
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" | "file" => Ok(Self::Sqlite),
            other => Err(DbError::configuration(format!(
                "Unknown backend kind '{}'. Expected one of: postgres, mysql, sqlite",
                other
            ))),
        }
    }
}

/// Capability set advertised by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_transactions: bool,
    /// Savepoint-based nesting inside an open transaction.
    pub supports_nested_transactions: bool,
    /// Pool size used when the configuration leaves pool-max unset.
    pub default_pool_size: u32,
}

impl Capabilities {
    /// Nested transactions imply transactions, and a pool must hold at least
    /// one connection.
    pub fn is_consistent(&self) -> bool {
        (!self.supports_nested_transactions || self.supports_transactions)
            && self.default_pool_size > 0
    }

    /// Same capabilities with savepoints switched off.
    pub fn without_nested_transactions(self) -> Self {
        Self {
            supports_nested_transactions: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("PostgreSQL".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("pg".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("mariadb".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!(" sqlite3 ".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
    }

    #[test]
    fn test_backend_kind_unknown_is_configuration_error() {
        let err = "oracle".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(BackendKind::Postgres.default_port(), Some(5432));
        assert_eq!(BackendKind::MySql.default_port(), Some(3306));
        assert_eq!(BackendKind::Sqlite.default_port(), None);
        assert!(!BackendKind::Sqlite.is_networked());
    }

    #[test]
    fn test_capabilities_consistency() {
        let caps = Capabilities {
            supports_transactions: false,
            supports_nested_transactions: true,
            default_pool_size: 4,
        };
        assert!(!caps.is_consistent());

        let caps = Capabilities {
            supports_transactions: true,
            supports_nested_transactions: true,
            default_pool_size: 4,
        };
        assert!(caps.is_consistent());
        let flat = caps.without_nested_transactions();
        assert!(flat.is_consistent());
        assert!(!flat.supports_nested_transactions);
    }
}
