//! Engine lifecycle: owns the pool and hands out sessions.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Disposing -> Disposed
//!                              \-> Failed ------------------^
//! ```
//!
//! Transitions only move forward. Leasing is allowed in `Ready` alone.

use crate::config::{PoolConfig, Settings};
use crate::db::connector::{ConnectionDescriptor, Connector, ConnectorFactory};
use crate::db::pool::DbPool;
use crate::db::session::{LeaseLedger, Session};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Capabilities};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Disposing,
    Disposed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
            EngineState::Disposing => "disposing",
            EngineState::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of engine and pool counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub engine_id: Uuid,
    pub backend: BackendKind,
    pub state: EngineState,
    /// Sessions handed out since init.
    pub leased_total: u64,
    /// Sessions returned since init, by any path.
    pub released_total: u64,
    pub in_use: u64,
    /// Highest concurrent `in_use` observed.
    pub peak_in_use: u64,
    pub pool_max: u32,
    /// Open connections; zero before init and after dispose.
    pub pool_size: u32,
    pub pool_idle: usize,
}

#[derive(Debug)]
pub struct Engine {
    id: Uuid,
    connector: Connector,
    descriptor: ConnectionDescriptor,
    pool_config: PoolConfig,
    dispose_timeout: Duration,
    state: RwLock<EngineState>,
    pool: OnceLock<DbPool>,
    ledger: Arc<LeaseLedger>,
    /// Serializes init and dispose.
    transition: Mutex<()>,
}

impl Engine {
    /// Select the connector and validate pool bounds. No I/O happens here.
    pub fn new(settings: &Settings) -> DbResult<Self> {
        let (connector, descriptor) = ConnectorFactory::from_settings(settings)?;
        let pool_config = settings.pool_config(&descriptor.capabilities())?;
        Ok(Self::with_parts(
            connector,
            descriptor,
            pool_config,
            settings.dispose_timeout(),
        ))
    }

    pub fn with_parts(
        connector: Connector,
        descriptor: ConnectionDescriptor,
        pool_config: PoolConfig,
        dispose_timeout: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            connector,
            descriptor,
            pool_config,
            dispose_timeout,
            state: RwLock::new(EngineState::Uninitialized),
            pool: OnceLock::new(),
            ledger: Arc::new(LeaseLedger::new(id)),
            transition: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *state, next);
        debug!(engine = %self.id, from = %previous, to = %next, "Engine state transition");
    }

    pub fn backend(&self) -> BackendKind {
        self.connector.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.descriptor.capabilities()
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Open the pool. A `Ready` engine is left untouched.
    pub async fn init(&self) -> DbResult<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            EngineState::Ready => return Ok(()),
            EngineState::Uninitialized => {}
            other => return Err(DbError::engine_not_ready(other)),
        }

        self.set_state(EngineState::Initializing);
        info!(
            engine = %self.id,
            backend = %self.backend(),
            url = %self.descriptor,
            "Initializing database engine"
        );

        let started = Instant::now();
        let connect_timeout = self.pool_config.connect_timeout;
        let opened = tokio::time::timeout(
            connect_timeout,
            self.connector.open_pool(&self.descriptor, &self.pool_config),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DbError::connection(
                format!(
                    "Timed out after {}s connecting to {}",
                    connect_timeout.as_secs_f64(),
                    self.descriptor
                ),
                "Check that the server is reachable or raise the connect timeout",
            ))
        });

        let pool = match opened {
            Ok(pool) => pool,
            Err(e) => {
                self.set_state(EngineState::Failed);
                error!(engine = %self.id, error = %e, "Database engine failed to initialize");
                return Err(match e {
                    DbError::Connection { .. } | DbError::Configuration { .. } => e,
                    other => DbError::connection(other.to_string(), "Verify host, port and credentials"),
                });
            }
        };

        if let Err(duplicate) = self.pool.set(pool) {
            duplicate.close().await;
            self.set_state(EngineState::Failed);
            return Err(DbError::engine_not_ready(EngineState::Failed));
        }
        self.set_state(EngineState::Ready);
        info!(
            engine = %self.id,
            backend = %self.backend(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            pool_max = self.pool_config.max_connections,
            "Database engine ready"
        );
        Ok(())
    }

    fn ready_pool(&self) -> DbResult<&DbPool> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(DbError::engine_not_ready(state));
        }
        self.pool
            .get()
            .ok_or_else(|| DbError::engine_not_ready(EngineState::Uninitialized))
    }

    /// Lease a session, waiting at most the acquire timeout.
    pub async fn lease(&self) -> DbResult<Session> {
        let pool = self.ready_pool()?;
        let started = Instant::now();

        let conn = pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => {
                warn!(
                    engine = %self.id,
                    timeout_ms = self.pool_config.acquire_timeout.as_millis() as u64,
                    in_use = self.ledger.snapshot().in_use,
                    "Pool exhausted"
                );
                DbError::pool_exhausted(self.pool_config.acquire_timeout)
            }
            sqlx::Error::PoolClosed => DbError::engine_not_ready(self.state()),
            other => DbError::from(other),
        })?;

        let session = Session::new(conn, self.capabilities(), &self.ledger);
        debug!(
            engine = %self.id,
            session = session.id(),
            waited_ms = started.elapsed().as_millis() as u64,
            "Session leased"
        );
        Ok(session)
    }

    /// Lease, giving up with `Cancelled` as soon as `cancel` resolves.
    ///
    /// An acquisition that loses the race is dropped before it completes, so
    /// no slot is leaked.
    pub async fn lease_until<C>(&self, cancel: C) -> DbResult<Session>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!(engine = %self.id, "Lease cancelled");
                Err(DbError::cancelled("session lease"))
            }
            leased = self.lease() => leased,
        }
    }

    /// Return a session to its pool.
    ///
    /// A session from another engine is still returned to its own pool, but
    /// the call reports `InvalidSession`.
    pub fn release(&self, session: Session) -> DbResult<()> {
        let owner = session.engine_id();
        if owner != self.id {
            let session_id = session.id();
            session.release();
            return Err(DbError::invalid_session(format!(
                "session {} was leased from engine {}, not {}",
                session_id, owner, self.id
            )));
        }
        session.release();
        Ok(())
    }

    /// Close the pool and move to `Disposed`. Safe to call more than once.
    pub async fn dispose(&self) -> DbResult<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            EngineState::Disposed | EngineState::Disposing => return Ok(()),
            EngineState::Ready => {}
            other => {
                debug!(engine = %self.id, state = %other, "Disposing engine that never became ready");
                self.set_state(EngineState::Disposed);
                return Ok(());
            }
        }

        self.set_state(EngineState::Disposing);
        info!(
            engine = %self.id,
            in_use = self.ledger.snapshot().in_use,
            "Disposing database engine"
        );

        if let Some(pool) = self.pool.get() {
            let closing = self.connector.close_pool(pool);
            if tokio::time::timeout(self.dispose_timeout, closing).await.is_err() {
                warn!(
                    engine = %self.id,
                    timeout_secs = self.dispose_timeout.as_secs(),
                    in_use = self.ledger.snapshot().in_use,
                    "Dispose timed out waiting for sessions; they will be closed on return"
                );
            }
        }

        self.set_state(EngineState::Disposed);
        let stats = self.stats();
        info!(
            engine = %self.id,
            leased_total = stats.leased_total,
            released_total = stats.released_total,
            "Database engine disposed"
        );
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let ledger = self.ledger.snapshot();
        let (pool_size, pool_idle) = self
            .pool
            .get()
            .map(|pool| (pool.size(), pool.num_idle()))
            .unwrap_or((0, 0));
        EngineStats {
            engine_id: self.id,
            backend: self.backend(),
            state: self.state(),
            leased_total: ledger.leased,
            released_total: ledger.released,
            in_use: ledger.in_use,
            peak_in_use: ledger.peak_in_use,
            pool_max: self.pool_config.max_connections,
            pool_size,
            pool_idle,
        }
    }
}
