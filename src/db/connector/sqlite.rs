//! SQLite (file-based) connector.

use super::{ConnectOptions, ConnectionDescriptor};
use crate::config::{PoolConfig, Settings};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Capabilities};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub(crate) const BEGIN: &str = "BEGIN";

/// SQLite serializes writers; one connection avoids SQLITE_BUSY churn.
const DEFAULT_POOL_SIZE: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqliteConnector;

impl SqliteConnector {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transactions: true,
            supports_nested_transactions: true,
            default_pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Host, port, user and secret are ignored; the database name is the file path.
    pub fn build_descriptor(&self, settings: &Settings) -> DbResult<ConnectionDescriptor> {
        let path = settings.database.trim();
        if path.is_empty() {
            return Err(DbError::configuration(
                "SQLite requires a database file path",
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(settings.acquire_timeout());

        Ok(ConnectionDescriptor::new(
            BackendKind::Sqlite,
            ConnectOptions::Sqlite(options),
            format!("sqlite://{}", path),
            self.capabilities(),
        ))
    }

    pub async fn open_pool(
        &self,
        options: &SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<SqlitePool, sqlx::Error> {
        SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .test_before_acquire(true)
            .connect_with(options.clone())
            .await
    }
}
