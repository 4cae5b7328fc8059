//! Health probes and the periodic monitor.
//!
//! A probe leases a session straight from the [`Engine`], runs `SELECT 1`,
//! releases the session and classifies the round trip. Probes never fail;
//! problems are reported as a `down` [`HealthStatus`] carrying the error text.

use crate::config::HealthConfig;
use crate::db::engine::{Engine, EngineState};
use crate::error::DbError;
use crate::models::{HealthState, HealthStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a probe reported `down`. Only ever rendered into [`HealthStatus::error`].
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("engine is {0}")]
    NotReady(EngineState),

    #[error("could not lease a session: {0}")]
    Acquire(DbError),

    #[error("probe query failed: {0}")]
    Query(DbError),

    #[error("probe exceeded {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Classify a finished probe.
pub fn classify(
    latency: Duration,
    outcome: Result<(), HealthCheckError>,
    warn_threshold: Duration,
) -> HealthStatus {
    let (state, error) = match outcome {
        Err(e) => (HealthState::Down, Some(e.to_string())),
        Ok(()) if latency >= warn_threshold => (HealthState::Degraded, None),
        Ok(()) => (HealthState::Ok, None),
    };
    HealthStatus {
        timestamp: Utc::now(),
        latency_ms: latency.as_millis() as u64,
        state,
        error,
    }
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    engine: Arc<Engine>,
    config: HealthConfig,
}

impl HealthChecker {
    pub fn new(engine: Arc<Engine>, config: HealthConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run one probe. Latency covers lease, query and release.
    pub async fn probe(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.round_trip())
            .await
            .unwrap_or(Err(HealthCheckError::TimedOut(self.config.probe_timeout)));
        let status = classify(started.elapsed(), outcome, self.config.warn_threshold);
        debug!(
            state = %status.state,
            latency_ms = status.latency_ms,
            error = ?status.error,
            "Health probe finished"
        );
        status
    }

    async fn round_trip(&self) -> Result<(), HealthCheckError> {
        let state = self.engine.state();
        if state != EngineState::Ready {
            return Err(HealthCheckError::NotReady(state));
        }
        let mut session = self.engine.lease().await.map_err(HealthCheckError::Acquire)?;
        let pinged = session.ping().await;
        if let Err(e) = self.engine.release(session) {
            warn!(error = %e, "Health probe session release rejected");
        }
        pinged.map_err(HealthCheckError::Query)
    }

    /// Probe on an interval in a background task.
    pub fn spawn_monitor(&self) -> HealthMonitor {
        HealthMonitor::spawn(self.clone())
    }
}

/// Handle to a background probe loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct HealthMonitor {
    task: JoinHandle<()>,
    latest: watch::Receiver<Option<HealthStatus>>,
}

impl HealthMonitor {
    fn spawn(checker: HealthChecker) -> Self {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(checker.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut previous: Option<HealthState> = None;

            info!(
                interval_secs = checker.config.interval.as_secs(),
                "Health monitor started"
            );
            loop {
                ticker.tick().await;
                if checker.engine.state() == EngineState::Disposed {
                    info!("Engine disposed; health monitor stopping");
                    break;
                }

                let status = checker.probe().await;
                if previous != Some(status.state) {
                    match status.state {
                        HealthState::Ok => info!(
                            latency_ms = status.latency_ms,
                            "Database health: ok"
                        ),
                        state => warn!(
                            state = %state,
                            latency_ms = status.latency_ms,
                            error = status.error.as_deref().unwrap_or(""),
                            "Database health changed"
                        ),
                    }
                    previous = Some(status.state);
                }
                tx.send_replace(Some(status));
            }
        });
        Self { task, latest: rx }
    }

    /// Most recent probe result, `None` before the first probe completes.
    pub fn latest(&self) -> Option<HealthStatus> {
        self.latest.borrow().clone()
    }

    /// Wait for the next probe result. Returns `None` once the monitor stopped.
    pub async fn next(&mut self) -> Option<HealthStatus> {
        self.latest.changed().await.ok()?;
        self.latest.borrow_and_update().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
