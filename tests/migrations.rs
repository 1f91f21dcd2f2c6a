use chirpy_api::test_support::{TestDatabase, TestDatabaseError};
use sqlx::migrate::Migrator;

static TEST_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn table_count(pool: &sqlx::PgPool, table: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .expect("lookup succeeded")
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping migration revert test: TEST_DATABASE_URL not set");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();

    TEST_MIGRATOR.run(&pool).await.expect("migrations run");

    TEST_MIGRATOR
        .undo(&pool, 0)
        .await
        .expect("migrations revert");

    assert_eq!(
        table_count(&pool, "refresh_tokens").await,
        0,
        "refresh_tokens should be dropped after revert"
    );
    assert_eq!(table_count(&pool, "credentials").await, 0);

    TEST_MIGRATOR.run(&pool).await.expect("migrations rerun");

    assert_eq!(table_count(&pool, "refresh_tokens").await, 1);
    assert_eq!(table_count(&pool, "credentials").await, 1);

    test_db.close().await.expect("failed to drop test database");
}
