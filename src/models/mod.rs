//! Data models for the data-access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod health;
pub mod query;
pub mod transaction;

// Re-export commonly used types
pub use connection::{BackendKind, Capabilities};
pub use health::{HealthState, HealthStatus};
pub use query::{QueryParam, Record};
pub use transaction::TransactionState;
