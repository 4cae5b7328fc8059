//! MySQL / MariaDB connector.

use super::{ConnectOptions, ConnectionDescriptor, redacted_network_url, require_network_fields};
use crate::config::{PoolConfig, Settings};
use crate::error::DbResult;
use crate::models::{BackendKind, Capabilities};
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

/// `BEGIN` is not accepted by the prepared-statement protocol on every
/// server version; `START TRANSACTION` is.
pub(crate) const BEGIN: &str = "START TRANSACTION";

const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlConnector;

impl MySqlConnector {
    /// Assumes a transactional storage engine (InnoDB), which also provides savepoints.
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
        let url = redacted_network_url("mysql", settings, port)?;

        let mut options = MySqlConnectOptions::new()
            .host(settings.host.trim())
            .port(port)
            .username(&settings.user)
            .database(&settings.database)
            .charset("utf8mb4");
        if !settings.secret.is_empty() {
            options = options.password(settings.secret.expose());
        }

        Ok(ConnectionDescriptor::new(
            BackendKind::MySql,
            ConnectOptions::MySql(options),
            url,
            self.capabilities(),
        ))
    }

    pub async fn open_pool(
        &self,
        options: &MySqlConnectOptions,
        config: &PoolConfig,
    ) -> Result<MySqlPool, sqlx::Error> {
        MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .test_before_acquire(true)
            .connect_with(options.clone())
            .await
    }
}
