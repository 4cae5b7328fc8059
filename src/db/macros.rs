//! Dispatch over the per-backend enums ([`DbPool`](crate::db::DbPool) and
//! the session connection).
//!
//! Two forms are accepted. With one binding and one body the body is
//! repeated for every backend, which works whenever the code is generic over
//! the driver:
//!
//! ```ignore
//! db_dispatch!(DbPool, pool, p => p.close().await)
//! ```
//!
//! With a braced arm list each backend gets its own body:
//!
//! ```ignore
//! db_dispatch!(SessionConn, conn, {
//!     Postgres(c) => run_pg(c),
//!     MySql(c) => run_mysql(c),
//!     Sqlite(c) => run_sqlite(c),
//! })
//! ```

macro_rules! db_dispatch {
    ($ty:ident, $value:expr, { $($variant:ident($binding:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::$ty::$variant($binding) => $body,
            )+
        }
    };
    ($ty:ident, $value:expr, $binding:ident => $body:expr) => {
        match $value {
            $crate::db::$ty::Postgres($binding) => $body,
            $crate::db::$ty::MySql($binding) => $body,
            $crate::db::$ty::Sqlite($binding) => $body,
        }
    };
}
