//! Integration tests for units of work against SQLite.

use std::time::Duration;
use tempfile::TempDir;
use unidb::models::TransactionState;
use unidb::{Database, DbError, QueryParam, Settings};

const SCHEMA: &str = "
    CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL UNIQUE);
    CREATE TABLE parents (id INTEGER PRIMARY KEY);
    CREATE TABLE children (
        id INTEGER PRIMARY KEY,
        parent_id INTEGER REFERENCES parents (id) DEFERRABLE INITIALLY DEFERRED
    );
";

async fn setup(dir: &TempDir, settings: impl FnOnce(Settings) -> Settings) -> Database {
    let base = Settings {
        acquire_timeout_ms: 5_000,
        ..Settings::sqlite(dir.path().join("uow.db").to_string_lossy())
    };
    let db = Database::connect(&settings(base)).await.unwrap();
    db.with_session(|s| Box::pin(async move { s.execute_script(SCHEMA).await }))
        .await
        .unwrap();
    db
}

async fn owners(db: &Database) -> Vec<String> {
    let rows = db
        .with_session(|s| {
            Box::pin(async move { s.fetch_all("SELECT owner FROM accounts ORDER BY id", &[]).await })
        })
        .await
        .unwrap();
    rows.iter()
        .filter_map(|r| r["owner"].as_str().map(String::from))
        .collect()
}

fn assert_settled(db: &Database) {
    let stats = db.stats();
    assert_eq!(stats.leased_total, stats.released_total, "{:?}", stats);
    assert_eq!(stats.in_use, 0, "{:?}", stats);
}

async fn insert_owner(s: &mut unidb::Session, id: i64, owner: &str) -> Result<u64, DbError> {
    s.execute(
        "INSERT INTO accounts (id, owner) VALUES (?, ?)",
        &[QueryParam::Int(id), owner.into()],
    )
    .await
}

#[tokio::test]
async fn test_committed_writes_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let written = db
        .transaction(|s| {
            Box::pin(async move {
                let a = insert_owner(s, 1, "alice").await?;
                let b = insert_owner(s, 2, "bob").await?;
                Ok::<_, DbError>(a + b)
            })
        })
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert_eq!(owners(&db).await, ["alice", "bob"]);
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_failed_body_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let err = db
        .transaction(|s| {
            Box::pin(async move {
                insert_owner(s, 1, "alice").await?;
                // Unique violation on the second write
                insert_owner(s, 2, "alice").await?;
                Ok::<_, DbError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Database { .. }), "got {:?}", err);
    assert!(owners(&db).await.is_empty());
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_explicit_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let mut unit = db.begin_unit_of_work().await.unwrap();
    assert_eq!(unit.state(), TransactionState::Open);
    unit.run(|s| Box::pin(async move { insert_owner(s, 1, "alice").await }))
        .await
        .unwrap();
    unit.rollback().await.unwrap();
    assert_eq!(unit.state(), TransactionState::RolledBack);

    // Terminal: no further use
    assert!(matches!(unit.session(), Err(DbError::Transaction { .. })));
    assert!(matches!(unit.commit().await, Err(DbError::Transaction { .. })));
    assert!(matches!(unit.rollback().await, Err(DbError::Transaction { .. })));

    assert!(owners(&db).await.is_empty());
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_commit_failure_marks_unit_failed_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let mut unit = db.begin_unit_of_work().await.unwrap();
    unit.run(|s| {
        Box::pin(async move {
            // Deferred constraint: accepted now, rejected at COMMIT
            s.execute(
                "INSERT INTO children (id, parent_id) VALUES (1, 99)",
                &[],
            )
            .await
        })
    })
    .await
    .unwrap();

    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, DbError::Transaction { .. }), "got {:?}", err);
    assert!(err.to_string().contains(&unit.id().to_string()));
    assert_eq!(unit.state(), TransactionState::Failed);
    drop(unit);

    assert_settled(&db);
    let children = db
        .with_session(|s| Box::pin(async move { s.fetch_all("SELECT id FROM children", &[]).await }))
        .await
        .unwrap();
    assert!(children.is_empty());
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_nested_scopes_use_savepoints() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let mut unit = db.begin_unit_of_work().await.unwrap();
    unit.run(|s| Box::pin(async move { insert_owner(s, 1, "alice").await }))
        .await
        .unwrap();
    unit.nested(|s| Box::pin(async move { insert_owner(s, 2, "bob").await }))
        .await
        .unwrap();
    let err = unit
        .nested(|s| {
            Box::pin(async move {
                insert_owner(s, 3, "carol").await?;
                insert_owner(s, 4, "alice").await
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));

    // The outer scope is still usable after the inner one rolled back
    assert_eq!(unit.state(), TransactionState::Open);
    unit.run(|s| Box::pin(async move { insert_owner(s, 5, "dave").await }))
        .await
        .unwrap();
    unit.commit().await.unwrap();
    assert_eq!(unit.state(), TransactionState::Committed);

    assert_eq!(owners(&db).await, ["alice", "bob", "dave"]);
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_nested_unsupported_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| Settings {
        disable_nested_transactions: true,
        ..s
    })
    .await;
    assert!(!db.capabilities().supports_nested_transactions);

    let mut unit = db.begin_unit_of_work().await.unwrap();
    let err = unit
        .nested(|s| Box::pin(async move { insert_owner(s, 1, "alice").await }))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnsupportedOperation { .. }), "got {:?}", err);
    assert_eq!(unit.state(), TransactionState::Open);
    unit.rollback().await.unwrap();

    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        db.transaction(|s| {
            Box::pin(async move {
                insert_owner(s, 1, "alice").await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, DbError>(())
            })
        }),
    )
    .await;
    assert!(outcome.is_err());

    // The single connection comes back once the background rollback finishes
    assert!(owners(&db).await.is_empty());
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_nested_scope_poisons_unit() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| s).await;

    let mut unit = db.begin_unit_of_work().await.unwrap();
    unit.run(|s| Box::pin(async move { insert_owner(s, 1, "alice").await }))
        .await
        .unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        unit.nested(|s| {
            Box::pin(async move {
                insert_owner(s, 2, "bob").await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, DbError>(())
            })
        }),
    )
    .await;
    assert!(abandoned.is_err());

    assert!(matches!(unit.session(), Err(DbError::Transaction { .. })));
    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, DbError::Transaction { .. }));
    assert_eq!(unit.state(), TransactionState::RolledBack);

    assert!(owners(&db).await.is_empty());
    assert_settled(&db);
    db.dispose().await.unwrap();
}

#[tokio::test]
async fn test_begin_on_saturated_pool() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup(&dir, |s| Settings {
        acquire_timeout_ms: 100,
        ..s
    })
    .await;

    let held = db.begin_unit_of_work().await.unwrap();
    let err = db.begin_unit_of_work().await.unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted { .. }));
    drop(held);

    // Dropping an open unit rolls back in the background before releasing
    let mut unit = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match db.begin_unit_of_work().await {
                Ok(unit) => return unit,
                Err(DbError::PoolExhausted { .. }) => continue,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
    })
    .await
    .unwrap();
    unit.commit().await.unwrap();
    assert_settled(&db);
    db.dispose().await.unwrap();
}
