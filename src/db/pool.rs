//! Backend-specific connection pools behind one enum.
//!
//! Each variant wraps the driver's own pool type (PgPool, MySqlPool,
//! SqlitePool) so the full type support of every driver stays available.

use crate::db::session::SessionConn;
use crate::models::BackendKind;
use sqlx::{MySqlPool, PgPool, SqlitePool};

#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    pub fn backend(&self) -> BackendKind {
        db_dispatch!(DbPool, self, {
            Postgres(_p) => BackendKind::Postgres,
            MySql(_p) => BackendKind::MySql,
            Sqlite(_p) => BackendKind::Sqlite,
        })
    }

    /// Close the pool. Resolves once every leased connection has been
    /// returned and closed; new acquisitions fail immediately.
    pub async fn close(&self) {
        db_dispatch!(DbPool, self, p => p.close().await)
    }

    pub fn is_closed(&self) -> bool {
        db_dispatch!(DbPool, self, p => p.is_closed())
    }

    /// Open connections, leased or idle.
    pub fn size(&self) -> u32 {
        db_dispatch!(DbPool, self, p => p.size())
    }

    pub fn num_idle(&self) -> usize {
        db_dispatch!(DbPool, self, p => p.num_idle())
    }

    /// Wait for a connection, bounded by the pool's acquire timeout.
    pub(crate) async fn acquire(&self) -> Result<SessionConn, sqlx::Error> {
        Ok(db_dispatch!(DbPool, self, {
            Postgres(p) => SessionConn::Postgres(p.acquire().await?),
            MySql(p) => SessionConn::MySql(p.acquire().await?),
            Sqlite(p) => SessionConn::Sqlite(p.acquire().await?),
        }))
    }
}
