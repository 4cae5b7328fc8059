//! unidb
//!
//! Backend-agnostic database access: pooled sessions, units of work and health
//! probes over PostgreSQL, MySQL and SQLite behind one interface.
//!
//! ```no_run
//! use unidb::{Database, DbError, Settings};
//!
//! # async fn demo() -> Result<(), DbError> {
//! let db = Database::connect(&Settings::sqlite("app.db")).await?;
//! let inserted = db
//!     .transaction(|session| {
//!         Box::pin(async move {
//!             session
//!                 .execute("INSERT INTO events (name) VALUES (?)", &["signup".into()])
//!                 .await
//!         })
//!     })
//!     .await?;
//! assert_eq!(inserted, 1);
//! db.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Secret, Settings};
pub use db::{Database, EngineState, HealthMonitor, Session, UnitOfWork};
pub use error::{DbError, DbResult};
pub use models::{BackendKind, HealthState, HealthStatus, QueryParam, Record};
