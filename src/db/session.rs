//! Leased sessions and the provider that scopes them.
//!
//! A [`Session`] owns exactly one pooled connection for its lifetime. It is
//! released by [`Engine::release`], by leaving a
//! [`SessionProvider::with_session`] scope, or simply by being dropped; the
//! lease ledger records each release once no matter which path is taken.

use crate::db::engine::Engine;
use crate::db::params;
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Capabilities, QueryParam, Record};
use futures_util::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres, Sqlite};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A pooled connection of whichever backend the engine runs.
pub(crate) enum SessionConn {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
    Sqlite(PoolConnection<Sqlite>),
}

/// Lease accounting shared by an engine and every session it hands out.
#[derive(Debug)]
pub(crate) struct LeaseLedger {
    engine_id: Uuid,
    next_session: AtomicU64,
    leased: AtomicU64,
    released: AtomicU64,
    in_use: AtomicU64,
    peak_in_use: AtomicU64,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LedgerSnapshot {
    pub leased: u64,
    pub released: u64,
    pub in_use: u64,
    pub peak_in_use: u64,
}

impl LeaseLedger {
    pub(crate) fn new(engine_id: Uuid) -> Self {
        Self {
            engine_id,
            next_session: AtomicU64::new(1),
            leased: AtomicU64::new(0),
            released: AtomicU64::new(0),
            in_use: AtomicU64::new(0),
            peak_in_use: AtomicU64::new(0),
        }
    }

    pub(crate) fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    fn issue(self: &Arc<Self>) -> LeaseTicket {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.leased.fetch_add(1, Ordering::AcqRel);
        let in_use = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::AcqRel);
        LeaseTicket {
            ledger: Arc::clone(self),
            session_id,
            leased_at: Instant::now(),
        }
    }

    fn settle(&self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            leased: self.leased.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
            in_use: self.in_use.load(Ordering::Acquire),
            peak_in_use: self.peak_in_use.load(Ordering::Acquire),
        }
    }
}

/// Settles its lease exactly once, when dropped.
#[derive(Debug)]
struct LeaseTicket {
    ledger: Arc<LeaseLedger>,
    session_id: u64,
    leased_at: Instant,
}

impl Drop for LeaseTicket {
    fn drop(&mut self) {
        self.ledger.settle();
        debug!(
            session = self.session_id,
            held_ms = self.leased_at.elapsed().as_millis() as u64,
            "Session released"
        );
    }
}

/// One leased connection.
///
/// Connection fields are declared before the ticket so the connection is
/// back in the pool before the lease is counted as settled.
pub struct Session {
    conn: SessionConn,
    capabilities: Capabilities,
    ticket: LeaseTicket,
}

impl Session {
    pub(crate) fn new(conn: SessionConn, capabilities: Capabilities, ledger: &Arc<LeaseLedger>) -> Self {
        Self {
            conn,
            capabilities,
            ticket: ledger.issue(),
        }
    }

    /// Identifier unique within the engine that leased this session.
    pub fn id(&self) -> u64 {
        self.ticket.session_id
    }

    pub fn backend(&self) -> BackendKind {
        db_dispatch!(SessionConn, &self.conn, {
            Postgres(_c) => BackendKind::Postgres,
            MySql(_c) => BackendKind::MySql,
            Sqlite(_c) => BackendKind::Sqlite,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn engine_id(&self) -> Uuid {
        self.ticket.ledger.engine_id()
    }

    /// How long this session has been leased.
    pub fn held_for(&self) -> Duration {
        self.ticket.leased_at.elapsed()
    }

    /// Run a parameterized statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = db_dispatch!(SessionConn, &mut self.conn, {
            Postgres(c) => params::bind_postgres(sqlx::query(sql), params)
                .execute(&mut **c)
                .await?
                .rows_affected(),
            MySql(c) => params::bind_mysql(sqlx::query(sql), params)
                .execute(&mut **c)
                .await?
                .rows_affected(),
            Sqlite(c) => params::bind_sqlite(sqlx::query(sql), params)
                .execute(&mut **c)
                .await?
                .rows_affected(),
        });
        Ok(result)
    }

    /// Run a parameterized query and decode every row.
    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Record>> {
        let records: Vec<Record> = db_dispatch!(SessionConn, &mut self.conn, {
            Postgres(c) => params::bind_postgres(sqlx::query(sql), params)
                .fetch_all(&mut **c)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
            MySql(c) => params::bind_mysql(sqlx::query(sql), params)
                .fetch_all(&mut **c)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
            Sqlite(c) => params::bind_sqlite(sqlx::query(sql), params)
                .fetch_all(&mut **c)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
        });
        Ok(records)
    }

    /// Run a parameterized query and decode the first row, if any.
    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Record>> {
        let record = db_dispatch!(SessionConn, &mut self.conn, {
            Postgres(c) => params::bind_postgres(sqlx::query(sql), params)
                .fetch_optional(&mut **c)
                .await?
                .map(|row| row.to_record()),
            MySql(c) => params::bind_mysql(sqlx::query(sql), params)
                .fetch_optional(&mut **c)
                .await?
                .map(|row| row.to_record()),
            Sqlite(c) => params::bind_sqlite(sqlx::query(sql), params)
                .fetch_optional(&mut **c)
                .await?
                .map(|row| row.to_record()),
        });
        Ok(record)
    }

    /// Run one or more unparameterized statements (DDL, scripts).
    pub async fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        self.unprepared(sql).await?;
        Ok(())
    }

    /// Round-trip `SELECT 1`.
    pub async fn ping(&mut self) -> DbResult<()> {
        self.execute_script("SELECT 1").await
    }

    /// Issue a transaction-control statement.
    pub(crate) async fn control(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.unprepared(sql).await
    }

    /// Run SQL without arguments, so it is sent as a simple (unprepared)
    /// query. Boxed so callers can move it onto a spawned task.
    fn unprepared<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<(), sqlx::Error>> {
        Box::pin(async move {
            db_dispatch!(SessionConn, &mut self.conn, c => {
                sqlx::Executor::execute(&mut **c, sql).await?;
            });
            Ok(())
        })
    }

    /// Return the connection to its pool.
    pub(crate) fn release(self) {
        drop(self);
    }

    /// Drop the connection without returning it to the pool. Needs no
    /// runtime, unlike [`Session::discard`].
    pub(crate) fn detach(self) {
        let Session { conn, ticket, .. } = self;
        db_dispatch!(SessionConn, conn, c => drop(c.detach()));
        debug!(session = ticket.session_id, "Connection detached from pool");
    }

    /// Close the connection instead of returning it; used when its state can
    /// no longer be trusted.
    pub(crate) async fn discard(self) {
        let Session { conn, ticket, .. } = self;
        let closed = db_dispatch!(SessionConn, conn, c => c.close().await);
        if let Err(e) = closed {
            warn!(session = ticket.session_id, error = %e, "Error while closing discarded connection");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("backend", &self.backend())
            .field("engine_id", &self.engine_id())
            .finish_non_exhaustive()
    }
}

/// Scoped access to sessions of one engine.
#[derive(Debug, Clone)]
pub struct SessionProvider {
    engine: Arc<Engine>,
}

impl SessionProvider {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn lease(&self) -> DbResult<Session> {
        self.engine.lease().await
    }

    pub async fn lease_until<C>(&self, cancel: C) -> DbResult<Session>
    where
        C: Future<Output = ()>,
    {
        self.engine.lease_until(cancel).await
    }

    pub fn release(&self, session: Session) -> DbResult<()> {
        self.engine.release(session)
    }

    /// Lease a session, run `op` with it, and release it on every exit path.
    ///
    /// Lease failures are converted into the caller's error type; errors
    /// returned by `op` pass through unchanged. If the returned future is
    /// dropped mid-operation the session is released by its destructor.
    pub async fn with_session<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let mut session = self.engine.lease().await?;
        let result = op(&mut session).await;
        if let Err(e) = self.engine.release(session) {
            warn!(error = %e, "Session release rejected");
        }
        result
    }
}
