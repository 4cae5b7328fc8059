//! PostgreSQL connector.

use super::{ConnectOptions, ConnectionDescriptor, redacted_network_url, require_network_fields};
use crate::config::{PoolConfig, Settings};
use crate::error::DbResult;
use crate::models::{BackendKind, Capabilities};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Statement that opens a transaction on a PostgreSQL session.
pub(crate) const BEGIN: &str = "BEGIN";

const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PORT: u16 = 5432;
const APPLICATION_NAME: &str = "unidb";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transactions: true,
            supports_nested_transactions: true,
            default_pool_size: DEFAULT_POOL_SIZE,
        }
    }

    pub fn build_descriptor(&self, settings: &Settings) -> DbResult<ConnectionDescriptor> {
        require_network_fields(settings)?;
        let port = settings.port.unwrap_or(DEFAULT_PORT);
        let url = redacted_network_url("postgres", settings, port)?;

        let mut options = PgConnectOptions::new()
            .host(settings.host.trim())
            .port(port)
            .username(&settings.user)
            .database(&settings.database)
            .application_name(APPLICATION_NAME);
        if !settings.secret.is_empty() {
            options = options.password(settings.secret.expose());
        }

        Ok(ConnectionDescriptor::new(
            BackendKind::Postgres,
            ConnectOptions::Postgres(options),
            url,
            self.capabilities(),
        ))
    }

    pub async fn open_pool(
        &self,
        options: &PgConnectOptions,
        config: &PoolConfig,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .test_before_acquire(true)
            .connect_with(options.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    fn settings() -> Settings {
        Settings {
            database: "orders".to_string(),
            user: "app".to_string(),
            ..Settings::new(BackendKind::Postgres)
        }
    }

    #[test]
    fn test_descriptor_without_secret_has_no_password() {
        let descriptor = PostgresConnector.build_descriptor(&settings()).unwrap();
        assert_eq!(
            descriptor.redacted_url(),
            "postgres://app@localhost:5432/orders"
        );
    }

    #[test]
    fn test_descriptor_requires_host() {
        let settings = Settings {
            host: " ".to_string(),
            ..settings()
        };
        let err = PostgresConnector.build_descriptor(&settings).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("host"));
    }
}
