//! Units of work: one session, one transaction.
//!
//! A [`UnitOfWork`] leases its session on `begin` and gives it back exactly
//! once, when the unit reaches a terminal state (or when dropped). Statements
//! run through [`UnitOfWork::run`], [`UnitOfWork::nested`] or the session
//! borrowed from [`UnitOfWork::session`].
//!
//! Transaction control is issued as plain SQL on the leased [`Session`], which
//! keeps lease accounting and savepoint naming with the unit. A connection
//! whose transaction cannot be closed is never returned to the pool: it is
//! closed, or detached when dropped outside a runtime.

use crate::db::connector::{mysql, postgres, sqlite};
use crate::db::engine::Engine;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, TransactionState};
use futures_util::future::BoxFuture;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";
const SAVEPOINT_PREFIX: &str = "uow_sp_";

fn begin_statement(backend: BackendKind) -> &'static str {
    match backend {
        BackendKind::Postgres => postgres::BEGIN,
        BackendKind::MySql => mysql::BEGIN,
        BackendKind::Sqlite => sqlite::BEGIN,
    }
}

pub struct UnitOfWork {
    id: Uuid,
    backend: BackendKind,
    session: Option<Session>,
    state: TransactionState,
    savepoints: u32,
    /// Set while a nested scope runs; still set afterwards only if that scope
    /// was abandoned mid-flight.
    poisoned: bool,
    started: Instant,
}

impl UnitOfWork {
    /// Lease a session from `engine` and open a transaction on it.
    pub async fn begin(engine: &Engine) -> DbResult<Self> {
        let backend = engine.backend();
        if !engine.capabilities().supports_transactions {
            return Err(DbError::unsupported("transactions", backend.to_string()));
        }

        let mut session = engine.lease().await?;
        let id = Uuid::new_v4();
        if let Err(e) = session.control(begin_statement(backend)).await {
            warn!(unit = %id, error = %e, "Failed to begin unit of work");
            session.discard().await;
            return Err(DbError::transaction(format!("begin failed: {}", e), id.to_string()));
        }

        debug!(unit = %id, session = session.id(), backend = %backend, "Unit of work started");
        Ok(Self {
            id,
            backend,
            session: Some(session),
            state: TransactionState::Open,
            savepoints: 0,
            poisoned: false,
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    fn error(&self, message: impl Into<String>) -> DbError {
        DbError::transaction(message, self.id.to_string())
    }

    /// The transaction's session, available while the unit is open.
    pub fn session(&mut self) -> DbResult<&mut Session> {
        if !self.state.is_open() {
            return Err(self.error(format!("unit of work is {}", self.state)));
        }
        if self.poisoned {
            return Err(self.error("unit of work was poisoned by an abandoned nested scope"));
        }
        let id = self.id;
        self.session
            .as_mut()
            .ok_or_else(|| DbError::transaction("session already released", id.to_string()))
    }

    /// Run `op` inside the transaction. Does not commit or roll back.
    pub async fn run<T, E, F>(&mut self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let session = self.session()?;
        op(session).await
    }

    /// Run `op` inside a savepoint.
    ///
    /// `Ok` releases the savepoint; `Err` rolls back to it and leaves the
    /// outer transaction open. If the returned future is dropped before it
    /// finishes, the unit of work is poisoned and can only be rolled back.
    pub async fn nested<T, E, F>(&mut self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let id = self.id;
        let backend = self.backend;
        let supported = self.session()?.capabilities().supports_nested_transactions;
        if !supported {
            return Err(DbError::unsupported("nested units of work", backend.to_string()).into());
        }

        self.savepoints += 1;
        let name = format!("{}{}", SAVEPOINT_PREFIX, self.savepoints);
        let Some(session) = self.session.as_mut() else {
            return Err(DbError::transaction("session already released", id.to_string()).into());
        };
        session
            .control(&format!("SAVEPOINT {}", name))
            .await
            .map_err(|e| DbError::transaction(format!("savepoint failed: {}", e), id.to_string()))?;
        debug!(unit = %id, savepoint = %name, "Nested scope started");

        self.poisoned = true;
        let result = op(session).await;

        let cleanup = match &result {
            Ok(_) => format!("RELEASE SAVEPOINT {}", name),
            Err(_) => format!("ROLLBACK TO SAVEPOINT {}", name),
        };
        if let Err(e) = session.control(&cleanup).await {
            error!(unit = %id, savepoint = %name, error = %e, "Failed to close nested scope");
            return Err(DbError::transaction(
                format!("closing savepoint {} failed: {}", name, e),
                id.to_string(),
            )
            .into());
        }
        self.poisoned = false;

        if result.is_err() {
            debug!(unit = %id, savepoint = %name, "Nested scope rolled back");
        }
        result
    }

    /// Commit the transaction and release the session.
    ///
    /// On failure the unit moves to `Failed`, a cleanup rollback is attempted
    /// and the session is released (or closed if the rollback also fails).
    pub async fn commit(&mut self) -> DbResult<()> {
        if !self.state.is_open() {
            return Err(self.error(format!("cannot commit a {} unit of work", self.state)));
        }
        if self.poisoned {
            warn!(unit = %self.id, "Commit of poisoned unit of work; rolling back");
            self.rollback().await?;
            return Err(self.error("nested scope was abandoned; unit of work rolled back"));
        }

        let Some(mut session) = self.session.take() else {
            self.state = TransactionState::Failed;
            return Err(self.error("session already released"));
        };
        self.state = TransactionState::Committing;

        match session.control(COMMIT).await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                session.release();
                info!(
                    unit = %self.id,
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "Unit of work committed"
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                error!(unit = %self.id, error = %e, "Commit failed; rolling back");
                if let Err(rollback_err) = session.control(ROLLBACK).await {
                    warn!(unit = %self.id, error = %rollback_err, "Cleanup rollback failed; closing connection");
                    session.discard().await;
                } else {
                    session.release();
                }
                Err(self.error(format!("commit failed: {}", e)))
            }
        }
    }

    /// Roll back the transaction and release the session.
    ///
    /// If the rollback itself fails the connection is closed rather than
    /// returned to the pool mid-transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.state.is_open() {
            return Err(self.error(format!("cannot roll back a {} unit of work", self.state)));
        }
        let Some(mut session) = self.session.take() else {
            self.state = TransactionState::Failed;
            return Err(self.error("session already released"));
        };
        self.state = TransactionState::RollingBack;

        match session.control(ROLLBACK).await {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                session.release();
                info!(unit = %self.id, "Unit of work rolled back");
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                error!(unit = %self.id, error = %e, "Rollback failed; closing connection");
                session.discard().await;
                Err(self.error(format!("rollback failed: {}", e)))
            }
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let id = self.id;
        warn!(unit = %id, state = %self.state, "Unit of work dropped while open; rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match session.control(ROLLBACK).await {
                        Ok(()) => session.release(),
                        Err(e) => {
                            error!(unit = %id, error = %e, "Rollback after drop failed; closing connection");
                            session.discard().await;
                        }
                    }
                });
            }
            Err(_) => {
                error!(unit = %id, "No runtime to roll back dropped unit of work; detaching connection");
                session.detach();
            }
        }
    }
}
