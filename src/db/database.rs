//! The facade application code holds on to.

use crate::config::Settings;
use crate::db::engine::{Engine, EngineState, EngineStats};
use crate::db::health::{HealthChecker, HealthMonitor};
use crate::db::session::{Session, SessionProvider};
use crate::db::unit_of_work::UnitOfWork;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Capabilities, HealthStatus};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::error;

/// A configured database: engine, session provider and health checker.
///
/// Cheap to clone; clones share the engine.
#[derive(Debug, Clone)]
pub struct Database {
    engine: Arc<Engine>,
    sessions: SessionProvider,
    health: HealthChecker,
}

impl Database {
    /// Validate settings and build the engine without connecting.
    pub fn new(settings: &Settings) -> DbResult<Self> {
        let engine = Arc::new(Engine::new(settings)?);
        Ok(Self {
            sessions: SessionProvider::new(Arc::clone(&engine)),
            health: HealthChecker::new(Arc::clone(&engine), settings.health_config()),
            engine,
        })
    }

    /// Build and initialize in one step.
    pub async fn connect(settings: &Settings) -> DbResult<Self> {
        let db = Self::new(settings)?;
        db.init().await?;
        Ok(db)
    }

    pub async fn init(&self) -> DbResult<()> {
        self.engine.init().await
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionProvider {
        &self.sessions
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.health
    }

    pub async fn lease_session(&self) -> DbResult<Session> {
        self.sessions.lease().await
    }

    pub fn release_session(&self, session: Session) -> DbResult<()> {
        self.sessions.release(session)
    }

    /// See [`SessionProvider::with_session`].
    pub async fn with_session<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        self.sessions.with_session(op).await
    }

    pub async fn begin_unit_of_work(&self) -> DbResult<UnitOfWork> {
        UnitOfWork::begin(&self.engine).await
    }

    /// Run `op` in a unit of work: commit on `Ok`, roll back on `Err`.
    ///
    /// A failed rollback is logged and the body's error is returned.
    pub async fn transaction<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let mut unit = self.begin_unit_of_work().await?;
        match unit.run(op).await {
            Ok(value) => {
                unit.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    error!(unit = %unit.id(), error = %rollback_err, "Rollback after failed body also failed");
                }
                Err(e)
            }
        }
    }

    pub async fn health(&self) -> HealthStatus {
        self.health.probe().await
    }

    pub fn spawn_health_monitor(&self) -> HealthMonitor {
        self.health.spawn_monitor()
    }

    pub async fn dispose(&self) -> DbResult<()> {
        self.engine.dispose().await
    }

    pub fn backend(&self) -> BackendKind {
        self.engine.backend()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.engine.capabilities()
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }
}
