//! Database access layer.
//!
//! - `connector`: per-backend connectors and the factory that selects them
//! - `engine`: pool lifecycle and session leasing
//! - `session`: leased sessions and scoped access
//! - `unit_of_work`: transactions over one session
//! - `health`: probes and the periodic monitor
//! - `database`: the facade tying these together

#[macro_use]
mod macros;
pub mod connector;
pub mod database;
pub mod engine;
pub mod health;
mod params;
pub mod pool;
pub mod session;
pub mod types;
pub mod unit_of_work;

pub use connector::{ConnectionDescriptor, Connector, ConnectorFactory};
pub use database::Database;
pub use engine::{Engine, EngineState, EngineStats};
pub use health::{HealthCheckError, HealthChecker, HealthMonitor};
pub use pool::DbPool;
pub(crate) use session::SessionConn;
pub use session::{Session, SessionProvider};
pub use unit_of_work::UnitOfWork;
