//! Configuration handling for the data-access layer.
//!
//! [`Settings`] is parsed from CLI arguments and `UNIDB_*` environment
//! variables, or built in code with [`Settings::new`]. The secret is wrapped in
//! [`Secret`] so that no `Debug`/`Display` rendering of the settings exposes it.

use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Capabilities};
use clap::Args;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_POOL_MIN: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DISPOSE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Health warn threshold as a fraction of the acquisition timeout.
const HEALTH_WARN_DIVISOR: u32 = 4;

const REDACTED: &str = "****";

/// A credential that never appears in textual output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the plaintext. Only connectors should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Database settings.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Backend kind (postgres, mysql, sqlite)
    #[arg(long, env = "UNIDB_BACKEND", default_value = "postgres")]
    pub backend: BackendKind,

    /// Database host (ignored for sqlite)
    #[arg(long, env = "UNIDB_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Database port (defaults to the backend's standard port)
    #[arg(long, env = "UNIDB_PORT")]
    pub port: Option<u16>,

    /// Database name, or file path for sqlite
    #[arg(long, env = "UNIDB_DATABASE", default_value = "")]
    pub database: String,

    /// Database user
    #[arg(long, env = "UNIDB_USER", default_value = "")]
    pub user: String,

    /// Database password
    #[arg(
        long,
        env = "UNIDB_SECRET",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub secret: Secret,

    /// Minimum pooled connections
    #[arg(long, env = "UNIDB_POOL_MIN", default_value_t = DEFAULT_POOL_MIN)]
    pub pool_min: u32,

    /// Maximum pooled connections (defaults to the backend's pool size)
    #[arg(long, env = "UNIDB_POOL_MAX")]
    pub pool_max: Option<u32>,

    /// Maximum wait for a free connection, in milliseconds
    #[arg(
        long = "acquire-timeout-ms",
        env = "UNIDB_ACQUIRE_TIMEOUT_MS",
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_MS
    )]
    pub acquire_timeout_ms: u64,

    /// Idle pooled connections are closed after this many seconds
    #[arg(
        long = "idle-timeout-secs",
        env = "UNIDB_IDLE_TIMEOUT_SECS",
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS
    )]
    pub idle_timeout_secs: u64,

    /// Upper bound on opening the pool at startup, in seconds
    #[arg(
        long = "connect-timeout-secs",
        env = "UNIDB_CONNECT_TIMEOUT_SECS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS
    )]
    pub connect_timeout_secs: u64,

    /// How long dispose waits for outstanding sessions, in seconds
    #[arg(
        long = "dispose-timeout-secs",
        env = "UNIDB_DISPOSE_TIMEOUT_SECS",
        default_value_t = DEFAULT_DISPOSE_TIMEOUT_SECS
    )]
    pub dispose_timeout_secs: u64,

    /// Probes slower than this are reported as degraded (default: acquire timeout / 4)
    #[arg(long = "health-warn-ms", env = "UNIDB_HEALTH_WARN_MS")]
    pub health_warn_ms: Option<u64>,

    /// Probes slower than this are reported as down (default: acquire timeout)
    #[arg(long = "health-timeout-ms", env = "UNIDB_HEALTH_TIMEOUT_MS")]
    pub health_timeout_ms: Option<u64>,

    /// Interval between periodic health probes, in seconds
    #[arg(
        long = "health-interval-secs",
        env = "UNIDB_HEALTH_INTERVAL_SECS",
        default_value_t = DEFAULT_HEALTH_INTERVAL_SECS
    )]
    pub health_interval_secs: u64,

    /// Refuse nested units of work even if the backend supports savepoints
    #[arg(long, env = "UNIDB_DISABLE_NESTED_TRANSACTIONS")]
    pub disable_nested_transactions: bool,
}

impl Settings {
    /// Create settings for a backend with every other field at its default.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            host: DEFAULT_HOST.to_string(),
            port: None,
            database: String::new(),
            user: String::new(),
            secret: Secret::default(),
            pool_min: DEFAULT_POOL_MIN,
            pool_max: None,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            dispose_timeout_secs: DEFAULT_DISPOSE_TIMEOUT_SECS,
            health_warn_ms: None,
            health_timeout_ms: None,
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            disable_nested_transactions: false,
        }
    }

    /// Settings for a file-based database at `path`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            database: path.into(),
            ..Self::new(BackendKind::Sqlite)
        }
    }

    /// Port to connect to, falling back to the backend's standard port.
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or(self.backend.default_port())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_secs(self.dispose_timeout_secs)
    }

    /// Validate pool bounds and timeouts against the connector's defaults.
    pub fn pool_config(&self, capabilities: &Capabilities) -> DbResult<PoolConfig> {
        let max = self.pool_max.unwrap_or(capabilities.default_pool_size);
        if max == 0 {
            return Err(DbError::configuration("pool_max must be greater than 0"));
        }
        if self.pool_min > max {
            return Err(DbError::configuration(format!(
                "pool_min ({}) cannot exceed pool_max ({})",
                self.pool_min, max
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(DbError::configuration(
                "acquire_timeout_ms must be greater than 0",
            ));
        }

        Ok(PoolConfig {
            min_connections: self.pool_min,
            max_connections: max,
            acquire_timeout: self.acquire_timeout(),
            idle_timeout: self.idle_timeout(),
            connect_timeout: self.connect_timeout(),
        })
    }

    /// Health probe tunables, with defaults derived from the acquisition timeout.
    pub fn health_config(&self) -> HealthConfig {
        let acquire = self.acquire_timeout();
        HealthConfig {
            warn_threshold: self
                .health_warn_ms
                .map(Duration::from_millis)
                .unwrap_or(acquire / HEALTH_WARN_DIVISOR),
            probe_timeout: self
                .health_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(acquire),
            interval: Duration::from_secs(self.health_interval_secs.max(1)),
        }
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.backend {
            BackendKind::Sqlite => write!(f, "{} {}", self.backend, self.database)?,
            _ => {
                write!(f, "{} ", self.backend)?;
                if !self.user.is_empty() {
                    write!(f, "{}@", self.user)?;
                }
                write!(f, "{}", self.host)?;
                if let Some(port) = self.port_or_default() {
                    write!(f, ":{}", port)?;
                }
                write!(f, "/{}", self.database)?;
            }
        }
        match self.pool_max {
            Some(max) => write!(f, " (pool {}..{})", self.pool_min, max),
            None => write!(f, " (pool {}..default)", self.pool_min),
        }
    }
}

/// Validated pool bounds and timeouts applied when the engine opens its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Health probe tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub warn_threshold: Duration,
    pub probe_timeout: Duration,
    pub interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn caps(default_pool_size: u32) -> Capabilities {
        Capabilities {
            supports_transactions: true,
            supports_nested_transactions: true,
            default_pool_size,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::new(BackendKind::Postgres);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.port_or_default(), Some(5432));
        assert_eq!(settings.pool_min, DEFAULT_POOL_MIN);
        assert_eq!(settings.acquire_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_from_args() {
        let cli = TestCli::parse_from([
            "unidb",
            "--backend",
            "mysql",
            "--host",
            "db.internal",
            "--database",
            "sales",
            "--user",
            "app",
            "--secret",
            "hunter2",
            "--pool-max",
            "20",
            "--acquire-timeout-ms",
            "1500",
        ]);
        let settings = cli.settings;
        assert_eq!(settings.backend, BackendKind::MySql);
        assert_eq!(settings.port_or_default(), Some(3306));
        assert_eq!(settings.pool_max, Some(20));
        assert_eq!(settings.secret.expose(), "hunter2");
        assert_eq!(settings.acquire_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let result = TestCli::try_parse_from(["unidb", "--backend", "oracle"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_secret_never_rendered() {
        let mut settings = Settings::new(BackendKind::Postgres);
        settings.user = "app".to_string();
        settings.database = "orders".to_string();
        settings.secret = Secret::new("s3cr3t-value");

        let debug = format!("{:?}", settings);
        let display = settings.to_string();
        assert!(!debug.contains("s3cr3t-value"));
        assert!(!display.contains("s3cr3t-value"));
        assert!(debug.contains("****"));
        assert_eq!(display, "PostgreSQL app@localhost:5432/orders (pool 1..default)");
    }

    #[test]
    fn test_pool_config_uses_connector_default() {
        let settings = Settings::sqlite("app.db");
        let config = settings.pool_config(&caps(1)).unwrap();
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.min_connections, 1);
    }

    #[test]
    fn test_pool_config_min_exceeds_max() {
        let settings = Settings {
            pool_min: 10,
            pool_max: Some(5),
            ..Settings::new(BackendKind::Postgres)
        };
        let err = settings.pool_config(&caps(10)).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_pool_config_max_zero() {
        let settings = Settings {
            pool_min: 0,
            pool_max: Some(0),
            ..Settings::new(BackendKind::Postgres)
        };
        let err = settings.pool_config(&caps(10)).unwrap_err();
        assert!(err.to_string().contains("pool_max"));
    }

    #[test]
    fn test_health_config_defaults_follow_acquire_timeout() {
        let settings = Settings {
            acquire_timeout_ms: 2_000,
            ..Settings::new(BackendKind::Postgres)
        };
        let health = settings.health_config();
        assert_eq!(health.warn_threshold, Duration::from_millis(500));
        assert_eq!(health.probe_timeout, Duration::from_millis(2_000));
        assert_eq!(health.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_health_config_overrides() {
        let settings = Settings {
            health_warn_ms: Some(50),
            health_timeout_ms: Some(300),
            health_interval_secs: 0,
            ..Settings::new(BackendKind::Postgres)
        };
        let health = settings.health_config();
        assert_eq!(health.warn_threshold, Duration::from_millis(50));
        assert_eq!(health.probe_timeout, Duration::from_millis(300));
        assert_eq!(health.interval, Duration::from_secs(1));
    }
}
