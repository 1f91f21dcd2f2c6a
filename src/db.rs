use rocket_db_pools::{Database, sqlx};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("chirpy_db")]
pub struct ChirpyDb(sqlx::PgPool);

/// Apply pending schema migrations for credentials and refresh tokens.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
