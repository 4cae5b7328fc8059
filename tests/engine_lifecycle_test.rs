//! Integration tests for the engine lifecycle.

use std::time::{Duration, Instant};
use tempfile::TempDir;
use unidb::models::BackendKind;
use unidb::{Database, DbError, EngineState, Settings};

fn sqlite_settings(dir: &TempDir) -> Settings {
    Settings {
        acquire_timeout_ms: 2_000,
        ..Settings::sqlite(dir.path().join("lifecycle.db").to_string_lossy())
    }
}

/// PostgreSQL settings pointing at a port nothing listens on.
fn unreachable_settings() -> Settings {
    Settings {
        host: "127.0.0.1".to_string(),
        port: Some(1),
        database: "app".to_string(),
        user: "app".to_string(),
        pool_min: 0,
        acquire_timeout_ms: 500,
        connect_timeout_secs: 3,
        ..Settings::new(BackendKind::Postgres)
    }
}

#[tokio::test]
async fn test_init_and_dispose() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&sqlite_settings(&dir)).unwrap();
    assert_eq!(db.state(), EngineState::Uninitialized);

    db.init().await.unwrap();
    assert_eq!(db.state(), EngineState::Ready);
    assert_eq!(db.backend(), BackendKind::Sqlite);

    let session = db.lease_session().await.unwrap();
    db.release_session(session).unwrap();

    db.dispose().await.unwrap();
    assert_eq!(db.state(), EngineState::Disposed);

    // Idempotent
    db.dispose().await.unwrap();
    assert_eq!(db.state(), EngineState::Disposed);

    let err = db.lease_session().await.unwrap_err();
    assert!(matches!(
        err,
        DbError::EngineNotReady {
            state: EngineState::Disposed
        }
    ));
}

#[tokio::test]
async fn test_unreachable_host_fails_init() {
    let db = Database::new(&unreachable_settings()).unwrap();

    let err = db.init().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "got {:?}", err);
    assert!(err.suggestion().is_some());
    assert_eq!(db.state(), EngineState::Failed);

    let err = db.lease_session().await.unwrap_err();
    assert!(matches!(
        err,
        DbError::EngineNotReady {
            state: EngineState::Failed
        }
    ));

    // A failed engine cannot be re-initialized, only disposed
    let err = db.init().await.unwrap_err();
    assert!(matches!(err, DbError::EngineNotReady { .. }));
    db.dispose().await.unwrap();
    assert_eq!(db.state(), EngineState::Disposed);
}

#[tokio::test]
async fn test_invalid_pool_bounds_fail_before_io() {
    let settings = Settings {
        pool_max: Some(0),
        ..unreachable_settings()
    };
    let err = Database::new(&settings).unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_dispose_waits_for_outstanding_session() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&sqlite_settings(&dir)).await.unwrap();

    let session = db.lease_session().await.unwrap();
    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(session);
    });

    let started = Instant::now();
    db.dispose().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(db.state(), EngineState::Disposed);

    holder.await.unwrap();
    let stats = db.stats();
    assert_eq!(stats.leased_total, stats.released_total);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn test_dispose_gives_up_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        dispose_timeout_secs: 1,
        ..sqlite_settings(&dir)
    };
    let db = Database::connect(&settings).await.unwrap();
    let session = db.lease_session().await.unwrap();

    let started = Instant::now();
    db.dispose().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(db.state(), EngineState::Disposed);

    drop(session);
    assert_eq!(db.stats().in_use, 0);
}

#[tokio::test]
async fn test_lease_until_cancelled_does_not_leak() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        pool_max: Some(1),
        ..sqlite_settings(&dir)
    };
    let db = Database::connect(&settings).await.unwrap();
    let held = db.lease_session().await.unwrap();

    let err = db
        .sessions()
        .lease_until(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Cancelled { .. }));

    db.release_session(held).unwrap();
    let again = db.lease_session().await.unwrap();
    db.release_session(again).unwrap();

    let stats = db.stats();
    assert_eq!(stats.leased_total, 2);
    assert_eq!(stats.released_total, 2);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_engine_stats_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&sqlite_settings(&dir)).await.unwrap();
    let json = serde_json::to_value(db.stats()).unwrap();
    assert_eq!(json["state"], "ready");
    assert_eq!(json["pool_max"], 1);
    assert_eq!(json["in_use"], 0);
    assert_eq!(json["engine_id"], db.engine().id().to_string());
    db.dispose().await.unwrap();
}
